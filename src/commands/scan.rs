use std::path::{Path, PathBuf};

use crate::app::AppContext;
use crate::commands::CommandResult;
use crate::services::{ReconcileAction, ReconciledFile};

/// Paths under `folder` whose file name matches a known download name.
pub fn scan_folder(ctx: &AppContext, folder: &str) -> CommandResult<Vec<String>> {
    let matches = ctx
        .reconciler()?
        .scan(Path::new(folder))?
        .map(|path| path.to_string_lossy().to_string())
        .collect();
    Ok(matches)
}

pub fn process_scanned_files(
    ctx: &AppContext,
    paths: &[String],
    action: ReconcileAction,
) -> CommandResult<Vec<ReconciledFile>> {
    let paths: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
    Ok(ctx.reconciler()?.reconcile(&paths, action)?)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::commands::test_support::library_context;
    use crate::db::queries::{CatalogReads, ClaimQueries};
    use crate::models::Claim;

    #[test]
    fn scan_then_keep_marks_rows() {
        let (ctx, library) = library_context("scan-command");
        ctx.database()
            .unwrap()
            .upsert_claim(&Claim {
                claim_id: "s1".to_string(),
                name: "Scanned".to_string(),
                alt_name: "Scanned".to_string(),
                publisher: "@pub".to_string(),
                download_name: "scanned.zip".to_string(),
                size: 1,
                ..Claim::default()
            })
            .unwrap();
        let folder = library.parent().unwrap().join("incoming");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("scanned.zip"), b"z").unwrap();
        fs::write(folder.join("random.zip"), b"z").unwrap();

        let found = scan_folder(&ctx, &folder.to_string_lossy()).unwrap();
        assert_eq!(found.len(), 1);

        let results = process_scanned_files(&ctx, &found, ReconcileAction::Keep).unwrap();
        assert_eq!(results.len(), 1);
        assert!(ctx.database().unwrap().fetch_by_id("s1").unwrap().unwrap().downloaded);
    }
}
