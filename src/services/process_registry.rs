use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use sysinfo::{Pid, System};

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveProcess {
    pub pid: u32,
    pub batch_id: String,
    pub claim_id: String,
    pub started_at: i64,
}

/// Download subprocesses currently in flight, keyed by pid.
#[derive(Clone, Default)]
pub struct ActiveProcesses {
    inner: Arc<Mutex<HashMap<u32, ActiveProcess>>>,
}

impl ActiveProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pid: u32, batch_id: &str, claim_id: &str) {
        let mut map = self.lock();
        map.insert(
            pid,
            ActiveProcess {
                pid,
                batch_id: batch_id.to_string(),
                claim_id: claim_id.to_string(),
                started_at: chrono::Utc::now().timestamp(),
            },
        );
    }

    pub fn unregister(&self, pid: u32) -> Option<ActiveProcess> {
        let mut map = self.lock();
        map.remove(&pid)
    }

    pub fn list(&self) -> Vec<ActiveProcess> {
        let map = self.lock();
        let mut items: Vec<ActiveProcess> = map.values().cloned().collect();
        items.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.pid.cmp(&b.pid)));
        items
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Kills every registered process. A pid that no longer exists is noted,
    /// never treated as an error. Returns how many kill signals were sent.
    pub fn kill_all(&self) -> usize {
        let pids: Vec<u32> = {
            let mut map = self.lock();
            map.drain().map(|(pid, _)| pid).collect()
        };
        if pids.is_empty() {
            return 0;
        }

        let mut system = System::new();
        system.refresh_processes();
        let mut killed = 0;
        for pid in pids {
            match system.process(Pid::from_u32(pid)) {
                Some(process) => {
                    if process.kill() {
                        tracing::info!(pid, "terminated download process");
                        killed += 1;
                    } else {
                        tracing::warn!(pid, "kill signal was not delivered");
                    }
                }
                None => tracing::info!(pid, "download process already exited"),
            }
        }
        killed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, ActiveProcess>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
