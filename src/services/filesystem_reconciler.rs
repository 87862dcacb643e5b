use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::db::queries::{CatalogReads, ClaimQueries};
use crate::db::Database;
use crate::errors::{LibraryError, Result};
use crate::utils::file::{claim_dirs, move_file};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileAction {
    Move,
    Keep,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledFile {
    pub original_path: String,
    pub new_path: String,
    pub claim_id: String,
}

/// Files under a root whose base name is a known download name. Walks the
/// tree once, top-down, without following symlinks.
pub struct ScanMatches {
    entries: walkdir::IntoIter,
    names: HashSet<String>,
}

impl Iterator for ScanMatches {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("skipping unreadable entry during scan: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let matched = entry
                .file_name()
                .to_str()
                .map(|name| self.names.contains(name))
                .unwrap_or(false);
            if matched {
                return Some(entry.into_path());
            }
        }
    }
}

#[derive(Clone)]
pub struct FilesystemReconciler {
    db: Database,
    library_root: PathBuf,
}

impl FilesystemReconciler {
    pub fn new(db: Database, library_root: PathBuf) -> Self {
        Self { db, library_root }
    }

    pub fn scan(&self, root: &Path) -> Result<ScanMatches> {
        if !root.is_dir() {
            return Err(LibraryError::NotFound(format!(
                "scan folder does not exist: {}",
                root.display()
            )));
        }
        let names = self.db.download_names()?;
        tracing::info!(root = %root.display(), known = names.len(), "scanning folder");
        Ok(ScanMatches {
            entries: WalkDir::new(root).follow_links(false).into_iter(),
            names,
        })
    }

    /// Attaches each path to its claim. Paths with no claim are skipped;
    /// a file that cannot be moved is skipped and logged.
    pub fn reconcile(&self, paths: &[PathBuf], action: ReconcileAction) -> Result<Vec<ReconciledFile>> {
        let mut reconciled = Vec::new();
        for path in paths {
            let Some(base_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(claim) = self.db.fetch_by_download_name(base_name)? else {
                tracing::debug!(path = %path.display(), "no catalog entry for scanned file");
                continue;
            };

            let destination = match action {
                ReconcileAction::Keep => path.clone(),
                ReconcileAction::Move => {
                    let (_, item_dir) = claim_dirs(&self.library_root, &claim);
                    let target = item_dir.join(base_name);
                    if target == *path {
                        target
                    } else if target.exists() {
                        tracing::warn!(
                            path = %path.display(),
                            target = %target.display(),
                            "target already exists, keeping file in place"
                        );
                        path.clone()
                    } else if let Err(err) = move_file(path, &target) {
                        tracing::error!(path = %path.display(), "failed to move scanned file: {err}");
                        continue;
                    } else {
                        target
                    }
                }
            };

            let new_path = destination.to_string_lossy().to_string();
            self.db.mark_downloaded_by_id(&claim.claim_id, &new_path)?;
            tracing::info!(claim_id = %claim.claim_id, path = %new_path, "scanned file attached");
            reconciled.push(ReconciledFile {
                original_path: path.to_string_lossy().to_string(),
                new_path,
                claim_id: claim.claim_id,
            });
        }
        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::db::test_support::temp_database;
    use crate::models::Claim;

    fn seed(db: &Database, id: &str, download_name: &str) {
        db.upsert_claim(&Claim {
            claim_id: id.to_string(),
            name: format!("Title {id}"),
            alt_name: format!("Title {id}"),
            publisher: "@maker".to_string(),
            download_name: download_name.to_string(),
            size: 5,
            ..Claim::default()
        })
        .unwrap();
    }

    fn scan_fixture(label: &str) -> (Database, PathBuf, PathBuf) {
        let (db, dir) = temp_database(label);
        seed(&db, "one", "one.zip");
        seed(&db, "two", "two.zip");
        seed(&db, "three", "three.zip");

        let scan_root = dir.join("downloads");
        fs::create_dir_all(scan_root.join("nested").join("deeper")).unwrap();
        fs::write(scan_root.join("one.zip"), b"1").unwrap();
        fs::write(scan_root.join("nested").join("two.zip"), b"2").unwrap();
        fs::write(scan_root.join("nested").join("deeper").join("three.zip"), b"3").unwrap();
        fs::write(scan_root.join("notes.txt"), b"x").unwrap();
        fs::write(scan_root.join("nested").join("other.zip"), b"y").unwrap();
        (db, dir, scan_root)
    }

    #[test]
    fn scan_returns_only_known_download_names() {
        let (db, dir, scan_root) = scan_fixture("scan");
        let reconciler = FilesystemReconciler::new(db, dir.join("library"));

        let mut found: Vec<String> = reconciler
            .scan(&scan_root)
            .unwrap()
            .filter_map(|path| path.file_name().map(|name| name.to_string_lossy().to_string()))
            .collect();
        found.sort();
        assert_eq!(found, vec!["one.zip", "three.zip", "two.zip"]);
    }

    #[test]
    fn move_relocates_matches_and_marks_rows() {
        let (db, dir, scan_root) = scan_fixture("move");
        let library = dir.join("library");
        let reconciler = FilesystemReconciler::new(db.clone(), library.clone());

        let matches: Vec<PathBuf> = reconciler.scan(&scan_root).unwrap().collect();
        let results = reconciler.reconcile(&matches, ReconcileAction::Move).unwrap();
        assert_eq!(results.len(), 3);

        for id in ["one", "two", "three"] {
            let expected = library
                .join("@maker")
                .join(format!("Title {id}"))
                .join(format!("{id}.zip"));
            assert!(expected.exists(), "{} missing", expected.display());
            let row = db.fetch_by_id(id).unwrap().unwrap();
            assert!(row.downloaded);
            assert_eq!(row.file_path, Some(expected.to_string_lossy().to_string()));
        }
        assert!(scan_root.join("notes.txt").exists());
        assert!(scan_root.join("nested").join("other.zip").exists());
        assert!(!scan_root.join("one.zip").exists());
    }

    #[test]
    fn keep_records_current_location() {
        let (db, dir, scan_root) = scan_fixture("keep");
        let reconciler = FilesystemReconciler::new(db.clone(), dir.join("library"));
        let original = scan_root.join("one.zip");

        let results = reconciler
            .reconcile(
                &[original.clone(), scan_root.join("unknown.bin")],
                ReconcileAction::Keep,
            )
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].new_path, original.to_string_lossy());
        assert!(original.exists());
        assert!(db.fetch_by_id("one").unwrap().unwrap().downloaded);
        assert!(!db.fetch_by_id("two").unwrap().unwrap().downloaded);
    }

    #[test]
    fn scanning_a_missing_folder_is_not_found() {
        let (db, dir) = temp_database("scan-missing");
        let reconciler = FilesystemReconciler::new(db, dir.join("library"));
        assert!(matches!(
            reconciler.scan(&dir.join("nope")),
            Err(LibraryError::NotFound(_))
        ));
    }
}
