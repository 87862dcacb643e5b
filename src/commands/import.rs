use crate::app::AppContext;
use crate::commands::CommandResult;
use crate::services::{ImportSource, ImportSummary};

/// Merges the links of `source` into the catalog.
pub async fn update_catalog(ctx: &AppContext, source: &ImportSource) -> CommandResult<ImportSummary> {
    let summary = ctx.importer()?.import(source).await?;
    tracing::info!(
        new = summary.new_files,
        updated = summary.updated_files,
        "catalog updated"
    );
    Ok(summary)
}
