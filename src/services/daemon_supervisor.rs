use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::errors::{LibraryError, Result};
use crate::services::rpc_client::{DaemonStatus, RpcClient};
use crate::utils::paths::{asset_dirs, daemon_path_override};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Probe and launch primitives for the local daemon.
#[async_trait]
pub trait DaemonControl: Send + Sync {
    /// Blocks behind the network, or `None` when unreachable. Never fails.
    async fn probe_status(&self) -> Option<u64>;
    async fn launch(&self) -> Result<()>;
    /// Exit code of a launched process that has already terminated.
    fn launch_exit_code(&self) -> Option<i32>;
    /// Releases a launched daemon so it outlives this process.
    fn detach(&self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "blocksBehind", rename_all = "camelCase")]
pub enum DaemonState {
    Unknown,
    Probing,
    Unreachable,
    Starting,
    Syncing(u64),
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DaemonProgress {
    Checking,
    Starting,
    Waiting,
    Syncing(u64),
    Ready,
}

impl fmt::Display for DaemonProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonProgress::Checking => write!(f, "Checking daemon status..."),
            DaemonProgress::Starting => write!(f, "Starting daemon..."),
            DaemonProgress::Waiting => write!(f, "Waiting for daemon..."),
            DaemonProgress::Syncing(blocks) => {
                write!(f, "Syncing blockchain: {blocks} blocks remaining...")
            }
            DaemonProgress::Ready => write!(f, "Synchronization complete."),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub max_unreachable_probes: u32,
    pub required_zero_readings: u32,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            max_unreachable_probes: 120,
            required_zero_readings: 2,
        }
    }
}

#[derive(Clone)]
pub struct DaemonSupervisor {
    control: Arc<dyn DaemonControl>,
    settings: SupervisorSettings,
    state: Arc<Mutex<DaemonState>>,
}

impl DaemonSupervisor {
    pub fn new(control: Arc<dyn DaemonControl>, settings: SupervisorSettings) -> Self {
        Self {
            control,
            settings,
            state: Arc::new(Mutex::new(DaemonState::Unknown)),
        }
    }

    pub fn state(&self) -> DaemonState {
        *self.lock()
    }

    pub async fn probe_status(&self) -> Option<u64> {
        self.control.probe_status().await
    }

    pub fn detach(&self) {
        self.control.detach();
    }

    /// Drives the daemon to a synchronized state, launching it when it does
    /// not answer. Progress strings are relayed through `on_progress`.
    pub async fn ensure_running<F>(&self, mut on_progress: F) -> Result<()>
    where
        F: FnMut(DaemonProgress) + Send,
    {
        on_progress(DaemonProgress::Checking);
        self.set_state(DaemonState::Probing);
        let mut reading = self.control.probe_status().await;

        if reading.is_none() {
            tracing::info!("daemon not reachable, launching");
            self.set_state(DaemonState::Unreachable);
            on_progress(DaemonProgress::Starting);
            self.set_state(DaemonState::Starting);
            if let Err(err) = self.control.launch().await {
                self.set_state(DaemonState::Unreachable);
                return Err(err);
            }
            tokio::time::sleep(self.settings.settle_delay).await;
            self.set_state(DaemonState::Probing);
            reading = self.control.probe_status().await;
        }

        let mut answered = false;
        let mut unreachable = 0u32;
        let mut zeros = 0u32;

        loop {
            match reading {
                Some(0) => {
                    answered = true;
                    zeros += 1;
                    if zeros >= self.settings.required_zero_readings {
                        tracing::info!("daemon synchronized");
                        self.set_state(DaemonState::Ready);
                        on_progress(DaemonProgress::Ready);
                        return Ok(());
                    }
                    // Confirmation probe goes out without waiting.
                    reading = self.control.probe_status().await;
                    continue;
                }
                Some(blocks) => {
                    answered = true;
                    zeros = 0;
                    tracing::debug!(blocks_behind = blocks, "daemon syncing");
                    self.set_state(DaemonState::Syncing(blocks));
                    on_progress(DaemonProgress::Syncing(blocks));
                }
                None => {
                    zeros = 0;
                    if !answered {
                        if let Some(code) = self.control.launch_exit_code() {
                            if code != 0 {
                                self.set_state(DaemonState::Unreachable);
                                return Err(LibraryError::DaemonStartup(format!(
                                    "lbrynet exited with code {code}"
                                )));
                            }
                        }
                    }
                    unreachable += 1;
                    tracing::debug!(
                        attempt = unreachable,
                        ceiling = self.settings.max_unreachable_probes,
                        "waiting for daemon to respond"
                    );
                    if unreachable >= self.settings.max_unreachable_probes {
                        self.set_state(DaemonState::Unreachable);
                        return Err(LibraryError::DaemonStartup(format!(
                            "daemon did not respond after {unreachable} attempts"
                        )));
                    }
                    self.set_state(DaemonState::Unreachable);
                    on_progress(DaemonProgress::Waiting);
                }
            }

            tokio::time::sleep(self.settings.poll_interval).await;
            self.set_state(DaemonState::Probing);
            reading = self.control.probe_status().await;
        }
    }

    fn set_state(&self, next: DaemonState) {
        *self.lock() = next;
    }

    fn lock(&self) -> MutexGuard<'_, DaemonState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Holds the launched daemon and terminates it when dropped.
pub struct DaemonProcess(Option<Child>);

impl DaemonProcess {
    pub fn new(child: Child) -> Self {
        Self(Some(child))
    }

    pub fn pid(&self) -> Option<u32> {
        self.0.as_ref().and_then(Child::id)
    }

    pub fn exit_code(&mut self) -> Option<i32> {
        let child = self.0.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code().unwrap_or(-1)),
            _ => None,
        }
    }

    /// Lets the daemon outlive this handle.
    pub fn detach(mut self) {
        self.0.take();
    }

    pub fn terminate(&mut self) {
        if let Some(mut child) = self.0.take() {
            tracing::info!(pid = ?child.id(), "stopping daemon");
            if let Err(err) = child.start_kill() {
                tracing::warn!("failed to stop daemon: {err}");
            }
        }
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// The bundled `lbrynet` binary, controlled over its loopback JSON-RPC endpoint.
pub struct LbrynetDaemon {
    rpc: RpcClient,
    executable: PathBuf,
    process: Mutex<Option<DaemonProcess>>,
}

impl LbrynetDaemon {
    pub fn new(api_url: String, executable: PathBuf) -> Self {
        Self {
            rpc: RpcClient::new(api_url, Duration::from_secs(5)),
            executable,
            process: Mutex::new(None),
        }
    }

    fn lock_process(&self) -> MutexGuard<'_, Option<DaemonProcess>> {
        match self.process.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl DaemonControl for LbrynetDaemon {
    async fn probe_status(&self) -> Option<u64> {
        match self.rpc.call::<DaemonStatus>("status", json!({})).await {
            Ok(status) => {
                let lag = status.blocks_behind();
                if lag.is_none() {
                    tracing::debug!("status response lacks blocks_behind");
                }
                lag
            }
            Err(err) => {
                tracing::debug!("daemon status check failed: {err}");
                None
            }
        }
    }

    async fn launch(&self) -> Result<()> {
        if !self.executable.exists() {
            return Err(LibraryError::DaemonStartup(format!(
                "lbrynet binary not found at {}",
                self.executable.display()
            )));
        }
        ensure_executable(&self.executable)?;

        let mut command = Command::new(&self.executable);
        command
            .arg("start")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = self.executable.parent() {
            command.current_dir(dir);
        }
        #[cfg(target_os = "windows")]
        {
            command.creation_flags(CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|err| {
            LibraryError::DaemonStartup(format!(
                "failed to spawn {}: {err}",
                self.executable.display()
            ))
        })?;
        forward_output(&mut child, "lbrynet start");

        let process = DaemonProcess::new(child);
        tracing::info!(
            pid = ?process.pid(),
            path = %self.executable.display(),
            api = %self.rpc.endpoint(),
            "lbrynet launched"
        );
        *self.lock_process() = Some(process);
        Ok(())
    }

    fn launch_exit_code(&self) -> Option<i32> {
        self.lock_process().as_mut().and_then(DaemonProcess::exit_code)
    }

    fn detach(&self) {
        if let Some(process) = self.lock_process().take() {
            process.detach();
        }
    }
}

/// Forwards a child's stdout into the debug log and its stderr as warnings.
pub(crate) fn forward_output(child: &mut Child, source: &'static str) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(source, "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(source, "{line}");
            }
        });
    }
}

/// Folder and binary name of the bundled daemon for the running platform.
pub fn platform_layout() -> (&'static str, &'static str) {
    if cfg!(target_os = "windows") {
        ("lbrynet-win", "lbrynet.exe")
    } else if cfg!(target_os = "macos") {
        ("lbrynet-mac", "lbrynet")
    } else {
        ("lbrynet-linux", "lbrynet")
    }
}

/// `LBRYNET_PATH` when set, else the first bundled binary found under the
/// asset directories, else the first candidate (so errors name a real path).
pub fn resolve_daemon_executable() -> PathBuf {
    if let Some(path) = daemon_path_override() {
        return path;
    }
    let (folder, binary) = platform_layout();
    let candidates: Vec<PathBuf> = asset_dirs()
        .into_iter()
        .map(|dir| dir.join(folder).join(binary))
        .collect();
    candidates
        .iter()
        .find(|candidate| candidate.exists())
        .cloned()
        .or_else(|| candidates.into_iter().next())
        .unwrap_or_else(|| PathBuf::from("assets").join(folder).join(binary))
}

#[cfg(unix)]
pub fn ensure_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|err| {
        LibraryError::DaemonStartup(format!(
            "failed to set executable permissions on {}: {err}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
pub fn ensure_executable(_path: &Path) -> Result<()> {
    Ok(())
}
