use serde::Serialize;

use crate::app::AppContext;
use crate::commands::CommandResult;
use crate::services::{DaemonProgress, DaemonState};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatusReport {
    pub reachable: bool,
    pub blocks_behind: Option<u64>,
    pub state: DaemonState,
}

/// One probe, no launch.
pub async fn daemon_status(ctx: &AppContext) -> DaemonStatusReport {
    let blocks_behind = ctx.supervisor.probe_status().await;
    DaemonStatusReport {
        reachable: blocks_behind.is_some(),
        blocks_behind,
        state: ctx.supervisor.state(),
    }
}

pub async fn ensure_daemon<F>(ctx: &AppContext, on_progress: F) -> CommandResult<DaemonState>
where
    F: FnMut(DaemonProgress) + Send,
{
    ctx.supervisor.ensure_running(on_progress).await?;
    Ok(ctx.supervisor.state())
}
