use std::sync::Arc;

use crate::app::AppContext;
use crate::commands::CommandResult;
use crate::db::queries::CatalogReads;
use crate::errors::LibraryError;
use crate::services::{BatchObserver, BatchSummary, DaemonProgress};

/// Downloads the given claims into the library. The daemon is brought to a
/// synchronized state first; if that fails nothing is started.
pub async fn download_files<F>(
    ctx: &AppContext,
    claim_ids: &[String],
    on_daemon_progress: F,
    observer: Arc<dyn BatchObserver>,
) -> CommandResult<BatchSummary>
where
    F: FnMut(DaemonProgress) + Send,
{
    let db = ctx.database()?;
    let mut claims = Vec::with_capacity(claim_ids.len());
    for claim_id in claim_ids {
        match db.fetch_by_id(claim_id)? {
            Some(claim) => claims.push(claim),
            None => {
                return Err(LibraryError::NotFound(format!("no catalog entry for claim {claim_id}")).into())
            }
        }
    }

    if !claims.is_empty() {
        ctx.supervisor.ensure_running(on_daemon_progress).await?;
    }

    let library_root = ctx.library_root()?;
    let limit = ctx.config.get().max_concurrent_downloads;
    let summary = ctx
        .orchestrator()?
        .run_batch(claims, &library_root, limit, observer)
        .await?;
    Ok(summary)
}

/// Returns the number of batches that were asked to stop.
pub fn cancel_downloads(ctx: &AppContext) -> usize {
    ctx.cancel_downloads()
}
