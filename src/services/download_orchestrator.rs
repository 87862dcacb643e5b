use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::db::queries::ClaimQueries;
use crate::db::Database;
use crate::errors::Result;
use crate::models::Claim;
use crate::services::daemon_supervisor::forward_output;
use crate::services::process_registry::ActiveProcesses;
use crate::utils::file::{claim_dirs, cleanup_folders};

const UNNAMED_PLACEHOLDER: &str = "Unnamed";

/// Why a single task ended as `failed`. Never aborts the batch.
#[derive(Error, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail")]
pub enum DownloadFailure {
    #[error("daemon executable not found at {0}")]
    TargetMissingDaemon(String),
    #[error("failed to start retrieval: {0}")]
    ProcessSpawnError(String),
    #[error("cannot create download folder: {0}")]
    DownloadDirUnavailable(String),
    #[error("retrieval exited with code {0}")]
    NonZeroExit(i32),
    #[error("file not present after download: {0}")]
    FileNotVerified(String),
    #[error("catalog update failed: {0}")]
    CatalogWriteFailed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub url: String,
    pub file_name: String,
    pub download_dir: PathBuf,
}

/// One running retrieval subprocess.
#[async_trait]
pub trait RetrievalProcess: Send {
    fn pid(&self) -> Option<u32>;
    async fn wait(&mut self) -> std::io::Result<i32>;
    async fn kill(&mut self) -> std::io::Result<()>;
}

pub trait Retriever: Send + Sync {
    fn spawn(
        &self,
        request: &RetrievalRequest,
    ) -> std::result::Result<Box<dyn RetrievalProcess>, DownloadFailure>;
}

/// Runs `lbrynet get` once per item.
pub struct DaemonRetriever {
    executable: PathBuf,
}

impl DaemonRetriever {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }
}

impl Retriever for DaemonRetriever {
    fn spawn(
        &self,
        request: &RetrievalRequest,
    ) -> std::result::Result<Box<dyn RetrievalProcess>, DownloadFailure> {
        if !self.executable.exists() {
            return Err(DownloadFailure::TargetMissingDaemon(
                self.executable.display().to_string(),
            ));
        }

        let mut command = Command::new(&self.executable);
        command
            .arg("get")
            .arg(&request.url)
            .arg(format!("--file_name={}", request.file_name))
            .arg(format!(
                "--download_directory={}",
                request.download_dir.display()
            ))
            .arg("--save_file=true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|err| DownloadFailure::ProcessSpawnError(err.to_string()))?;
        forward_output(&mut child, "lbrynet get");
        Ok(Box::new(ChildRetrieval { child }))
    }
}

struct ChildRetrieval {
    child: Child,
}

#[async_trait]
impl RetrievalProcess for ChildRetrieval {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BatchControl {
    Running,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Verified,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub batch_id: String,
    pub claim_id: String,
    pub name: String,
    pub status: TaskStatus,
    pub processed: usize,
    pub total: usize,
    pub fraction: f64,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub claim_id: String,
    pub name: String,
    pub reason: DownloadFailure,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub total: usize,
    pub verified: usize,
    pub failed: Vec<FailedItem>,
    pub cancelled: Vec<String>,
    pub was_cancelled: bool,
}

/// Receives per-task and final notifications for one batch.
pub trait BatchObserver: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
    fn on_complete(&self, summary: &BatchSummary);
}

/// Observer that only logs.
pub struct LogObserver;

impl BatchObserver for LogObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        tracing::info!(
            batch_id = %update.batch_id,
            claim_id = %update.claim_id,
            status = ?update.status,
            "{}/{} processed",
            update.processed,
            update.total
        );
    }

    fn on_complete(&self, summary: &BatchSummary) {
        tracing::info!(
            batch_id = %summary.batch_id,
            verified = summary.verified,
            failed = summary.failed.len(),
            cancelled = summary.cancelled.len(),
            "download batch finished"
        );
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OrchestratorSettings {
    pub verify_retries: u32,
    pub verify_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            verify_retries: 5,
            verify_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug)]
struct DownloadTask {
    claim_id: String,
    name: String,
    url: String,
    file_name: String,
    publisher_dir: PathBuf,
    item_dir: PathBuf,
    target_path: PathBuf,
}

impl DownloadTask {
    fn from_claim(claim: &Claim, library_root: &Path) -> Self {
        let file_name = placeholder(claim.download_name.trim(), UNNAMED_PLACEHOLDER);
        let name = placeholder(claim.name.trim(), &file_name);
        let (publisher_dir, item_dir) = claim_dirs(library_root, claim);
        let target_path = item_dir.join(&file_name);
        Self {
            claim_id: claim.claim_id.clone(),
            name,
            url: claim.retrieval_url().to_string(),
            file_name,
            publisher_dir,
            item_dir,
            target_path,
        }
    }

    fn cleanup(&self) {
        cleanup_folders(&self.item_dir, &self.publisher_dir);
    }
}

fn placeholder(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

enum TaskOutcome {
    Verified,
    Failed(DownloadFailure),
    Cancelled,
}

#[derive(Clone)]
pub struct DownloadOrchestrator {
    db: Database,
    retriever: Arc<dyn Retriever>,
    processes: ActiveProcesses,
    batches: Arc<Mutex<HashMap<String, watch::Sender<BatchControl>>>>,
    settings: OrchestratorSettings,
}

impl DownloadOrchestrator {
    pub fn new(
        db: Database,
        retriever: Arc<dyn Retriever>,
        processes: ActiveProcesses,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            db,
            retriever,
            processes,
            batches: Arc::new(Mutex::new(HashMap::new())),
            settings,
        }
    }

    pub fn active_batches(&self) -> Vec<String> {
        self.lock_batches().keys().cloned().collect()
    }

    /// Downloads `claims` into `library_root` with at most `limit` retrievals
    /// in flight. Completes once every task is terminal or the batch is cancelled.
    pub async fn run_batch(
        &self,
        claims: Vec<Claim>,
        library_root: &Path,
        limit: usize,
        observer: Arc<dyn BatchObserver>,
    ) -> Result<BatchSummary> {
        let batch_id = Uuid::new_v4().to_string();
        let total = claims.len();
        let limit = limit.max(1);

        let (tx, rx) = watch::channel(BatchControl::Running);
        self.lock_batches().insert(batch_id.clone(), tx);
        tracing::info!(batch_id = %batch_id, total, limit, "download batch started");

        let mut queue: VecDeque<DownloadTask> = claims
            .iter()
            .map(|claim| DownloadTask::from_claim(claim, library_root))
            .collect();
        let mut in_flight: JoinSet<(DownloadTask, TaskOutcome)> = JoinSet::new();
        let mut started: HashMap<String, String> = HashMap::new();

        let mut summary = BatchSummary {
            batch_id: batch_id.clone(),
            total,
            verified: 0,
            failed: Vec::new(),
            cancelled: Vec::new(),
            was_cancelled: false,
        };
        let mut processed = 0usize;

        loop {
            while in_flight.len() < limit {
                // Checked before every dequeue so a cancel always wins.
                if *rx.borrow() == BatchControl::Cancelled {
                    break;
                }
                let Some(task) = queue.pop_front() else {
                    break;
                };
                started.insert(task.claim_id.clone(), task.name.clone());
                let orchestrator = self.clone();
                let control = rx.clone();
                let batch = batch_id.clone();
                in_flight.spawn(async move {
                    let outcome = orchestrator.run_task(&batch, &task, control).await;
                    (task, outcome)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (task, outcome) = match joined {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(batch_id = %batch_id, "download task aborted: {err}");
                    continue;
                }
            };
            started.remove(&task.claim_id);

            let status = match outcome {
                TaskOutcome::Verified => {
                    summary.verified += 1;
                    TaskStatus::Verified
                }
                TaskOutcome::Failed(reason) => {
                    tracing::warn!(
                        batch_id = %batch_id,
                        claim_id = %task.claim_id,
                        "download failed: {reason}"
                    );
                    summary.failed.push(FailedItem {
                        claim_id: task.claim_id.clone(),
                        name: task.name.clone(),
                        reason,
                    });
                    TaskStatus::Failed
                }
                TaskOutcome::Cancelled => {
                    summary.cancelled.push(task.name.clone());
                    TaskStatus::Cancelled
                }
            };

            processed += 1;
            observer.on_progress(&ProgressUpdate {
                batch_id: batch_id.clone(),
                claim_id: task.claim_id.clone(),
                name: task.name.clone(),
                status,
                processed,
                total,
                fraction: processed as f64 / total.max(1) as f64,
            });
        }

        // Tasks lost to a panicked join still need a terminal entry.
        for (claim_id, name) in started.drain() {
            summary.failed.push(FailedItem {
                claim_id,
                name,
                reason: DownloadFailure::ProcessSpawnError("download task aborted".to_string()),
            });
        }

        if !queue.is_empty() {
            summary.was_cancelled = true;
            for task in queue.drain(..) {
                task.cleanup();
                summary.cancelled.push(task.name);
            }
        }
        if !summary.cancelled.is_empty() {
            summary.was_cancelled = true;
        }

        self.lock_batches().remove(&batch_id);
        observer.on_complete(&summary);
        Ok(summary)
    }

    /// Cancels one batch; its in-flight retrievals are killed by their tasks.
    pub fn cancel_batch(&self, batch_id: &str) -> bool {
        match self.lock_batches().get(batch_id) {
            Some(control) => {
                let _ = control.send(BatchControl::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Cancels every running batch and kills every registered retrieval process.
    pub fn cancel_all(&self) -> usize {
        let cancelled = {
            let batches = self.lock_batches();
            for control in batches.values() {
                let _ = control.send(BatchControl::Cancelled);
            }
            batches.len()
        };
        for process in self.processes.list() {
            tracing::info!(
                pid = process.pid,
                batch_id = %process.batch_id,
                claim_id = %process.claim_id,
                "stopping download"
            );
        }
        let killed = self.processes.kill_all();
        tracing::info!(batches = cancelled, killed, "cancelled active downloads");
        cancelled
    }

    async fn run_task(
        &self,
        batch_id: &str,
        task: &DownloadTask,
        mut control: watch::Receiver<BatchControl>,
    ) -> TaskOutcome {
        if *control.borrow() == BatchControl::Cancelled {
            task.cleanup();
            return TaskOutcome::Cancelled;
        }

        if let Err(err) = tokio::fs::create_dir_all(&task.item_dir).await {
            task.cleanup();
            return TaskOutcome::Failed(DownloadFailure::DownloadDirUnavailable(format!(
                "{}: {err}",
                task.item_dir.display()
            )));
        }

        let request = RetrievalRequest {
            url: task.url.clone(),
            file_name: task.file_name.clone(),
            download_dir: task.item_dir.clone(),
        };
        let mut process = match self.retriever.spawn(&request) {
            Ok(process) => process,
            Err(failure) => {
                task.cleanup();
                return TaskOutcome::Failed(failure);
            }
        };

        let pid = process.pid();
        if let Some(pid) = pid {
            self.processes.register(pid, batch_id, &task.claim_id);
        }
        tracing::debug!(claim_id = %task.claim_id, pid = ?pid, url = %task.url, "retrieval started");

        let exit = tokio::select! {
            status = process.wait() => Some(status),
            _ = wait_for_cancel(&mut control) => None,
        };
        if let Some(pid) = pid {
            self.processes.unregister(pid);
        }

        match exit {
            None => {
                if let Err(err) = process.kill().await {
                    tracing::debug!(claim_id = %task.claim_id, "kill after cancel: {err}");
                }
                task.cleanup();
                TaskOutcome::Cancelled
            }
            Some(Ok(0)) => {
                if !self.verify_exists(&task.target_path).await {
                    task.cleanup();
                    return TaskOutcome::Failed(DownloadFailure::FileNotVerified(
                        task.target_path.display().to_string(),
                    ));
                }
                let path = task.target_path.to_string_lossy().to_string();
                match self.db.mark_downloaded_by_id(&task.claim_id, &path) {
                    Ok(_) => {
                        tracing::info!(claim_id = %task.claim_id, path = %path, "download verified");
                        TaskOutcome::Verified
                    }
                    Err(err) => TaskOutcome::Failed(DownloadFailure::CatalogWriteFailed(
                        err.to_string(),
                    )),
                }
            }
            Some(Ok(code)) => {
                task.cleanup();
                TaskOutcome::Failed(DownloadFailure::NonZeroExit(code))
            }
            Some(Err(err)) => {
                task.cleanup();
                TaskOutcome::Failed(DownloadFailure::ProcessSpawnError(err.to_string()))
            }
        }
    }

    async fn verify_exists(&self, path: &Path) -> bool {
        let attempts = self.settings.verify_retries.max(1);
        for attempt in 1..=attempts {
            if tokio::fs::metadata(path).await.is_ok() {
                return true;
            }
            tracing::debug!(path = %path.display(), attempt, attempts, "file not visible yet");
            if attempt < attempts {
                tokio::time::sleep(self.settings.verify_delay).await;
            }
        }
        false
    }

    fn lock_batches(&self) -> std::sync::MutexGuard<'_, HashMap<String, watch::Sender<BatchControl>>> {
        match self.batches.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn wait_for_cancel(control: &mut watch::Receiver<BatchControl>) {
    loop {
        if *control.borrow() == BatchControl::Cancelled {
            return;
        }
        if control.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::db::queries::CatalogReads;
    use crate::db::test_support::temp_database;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        ExitWith(i32),
        ExitWithoutFile,
        Hang,
    }

    struct MockRetriever {
        behaviours: HashMap<String, Behaviour>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        spawned: Arc<Mutex<Vec<String>>>,
    }

    impl MockRetriever {
        fn new(behaviours: &[(&str, Behaviour)]) -> Arc<Self> {
            Arc::new(Self {
                behaviours: behaviours
                    .iter()
                    .map(|(name, behaviour)| (name.to_string(), *behaviour))
                    .collect(),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                spawned: Arc::new(Mutex::new(Vec::new())),
            })
        }
    }

    impl Retriever for MockRetriever {
        fn spawn(
            &self,
            request: &RetrievalRequest,
        ) -> std::result::Result<Box<dyn RetrievalProcess>, DownloadFailure> {
            let behaviour = self
                .behaviours
                .get(&request.file_name)
                .copied()
                .unwrap_or(Behaviour::Succeed);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.spawned.lock().unwrap().push(request.file_name.clone());
            Ok(Box::new(MockProcess {
                behaviour,
                target: request.download_dir.join(&request.file_name),
                in_flight: self.in_flight.clone(),
            }))
        }
    }

    struct MockProcess {
        behaviour: Behaviour,
        target: PathBuf,
        in_flight: Arc<AtomicUsize>,
    }

    impl Drop for MockProcess {
        fn drop(&mut self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RetrievalProcess for MockProcess {
        fn pid(&self) -> Option<u32> {
            None
        }

        async fn wait(&mut self) -> std::io::Result<i32> {
            tokio::time::sleep(Duration::from_millis(15)).await;
            match self.behaviour {
                Behaviour::Succeed => {
                    tokio::fs::write(&self.target, b"content").await?;
                    Ok(0)
                }
                Behaviour::ExitWith(code) => Ok(code),
                Behaviour::ExitWithoutFile => Ok(0),
                Behaviour::Hang => {
                    std::future::pending::<()>().await;
                    Ok(0)
                }
            }
        }

        async fn kill(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        updates: Mutex<Vec<ProgressUpdate>>,
        completed: Mutex<Option<BatchSummary>>,
    }

    impl BatchObserver for RecordingObserver {
        fn on_progress(&self, update: &ProgressUpdate) {
            self.updates.lock().unwrap().push(update.clone());
        }

        fn on_complete(&self, summary: &BatchSummary) {
            *self.completed.lock().unwrap() = Some(summary.clone());
        }
    }

    fn claim(id: &str, publisher: &str) -> Claim {
        Claim {
            claim_id: id.to_string(),
            name: format!("Game {id}"),
            alt_name: format!("Game {id}"),
            url: format!("lbry://{publisher}/game-{id}"),
            size: 10,
            publisher: publisher.to_string(),
            release_date: "2024-01-01".to_string(),
            download_name: format!("{id}.zip"),
            ..Claim::default()
        }
    }

    fn orchestrator(db: &Database, retriever: Arc<MockRetriever>) -> DownloadOrchestrator {
        DownloadOrchestrator::new(
            db.clone(),
            retriever,
            ActiveProcesses::new(),
            OrchestratorSettings {
                verify_retries: 2,
                verify_delay: Duration::from_millis(5),
            },
        )
    }

    #[tokio::test]
    async fn in_flight_tasks_never_exceed_the_limit() {
        let (db, dir) = temp_database("bound");
        let claims: Vec<Claim> = (0..7).map(|i| claim(&format!("c{i}"), "@dev")).collect();
        for item in &claims {
            db.upsert_claim(item).unwrap();
        }
        let retriever = MockRetriever::new(&[]);
        let observer = Arc::new(RecordingObserver::default());

        let summary = orchestrator(&db, retriever.clone())
            .run_batch(claims, &dir.join("library"), 3, observer.clone())
            .await
            .unwrap();

        assert!(retriever.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(summary.verified, 7);
        assert_eq!(summary.verified + summary.failed.len(), summary.total);
        assert_eq!(db.fetch_downloaded().unwrap().len(), 7);

        let processed: Vec<usize> = observer
            .updates
            .lock()
            .unwrap()
            .iter()
            .map(|update| update.processed)
            .collect();
        assert_eq!(processed, (1..=7).collect::<Vec<_>>());
        assert!(observer.completed.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_item_is_reported_and_its_folder_removed() {
        let (db, dir) = temp_database("failure");
        let library = dir.join("library");
        let good = claim("good", "@dev");
        let bad = claim("bad", "@dev");
        db.upsert_claim(&good).unwrap();
        db.upsert_claim(&bad).unwrap();
        let retriever = MockRetriever::new(&[("bad.zip", Behaviour::ExitWith(1))]);

        let summary = orchestrator(&db, retriever)
            .run_batch(vec![good, bad], &library, 1, Arc::new(LogObserver))
            .await
            .unwrap();

        assert_eq!(summary.verified, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].claim_id, "bad");
        assert_eq!(summary.failed[0].reason, DownloadFailure::NonZeroExit(1));
        assert!(!summary.was_cancelled);

        let row = db.fetch_by_id("bad").unwrap().unwrap();
        assert!(!row.downloaded);
        assert!(row.file_path.is_none());
        assert!(!library.join("@dev").join("Game bad").exists());
        assert!(library.join("@dev").join("Game good").join("good.zip").exists());

        let good_row = db.fetch_by_id("good").unwrap().unwrap();
        assert!(good_row.downloaded);
        assert!(good_row.file_path.unwrap().ends_with("good.zip"));
    }

    #[tokio::test]
    async fn missing_file_after_clean_exit_is_not_verified() {
        let (db, dir) = temp_database("verify");
        let library = dir.join("library");
        let item = claim("ghost", "@solo");
        db.upsert_claim(&item).unwrap();
        let retriever = MockRetriever::new(&[("ghost.zip", Behaviour::ExitWithoutFile)]);

        let summary = orchestrator(&db, retriever)
            .run_batch(vec![item], &library, 2, Arc::new(LogObserver))
            .await
            .unwrap();

        assert!(matches!(
            summary.failed[0].reason,
            DownloadFailure::FileNotVerified(_)
        ));
        assert!(!library.join("@solo").exists());
    }

    #[tokio::test]
    async fn unwritable_library_is_reported_as_folder_failure() {
        let (db, dir) = temp_database("no-folder");
        let library = dir.join("library");
        std::fs::write(&library, b"not a folder").unwrap();
        let item = claim("blocked", "@dev");
        db.upsert_claim(&item).unwrap();
        let retriever = MockRetriever::new(&[]);

        let summary = orchestrator(&db, retriever.clone())
            .run_batch(vec![item], &library, 1, Arc::new(LogObserver))
            .await
            .unwrap();

        assert_eq!(summary.failed.len(), 1);
        assert!(matches!(
            summary.failed[0].reason,
            DownloadFailure::DownloadDirUnavailable(_)
        ));
        assert!(retriever.spawned.lock().unwrap().is_empty());
        assert!(!db.fetch_by_id("blocked").unwrap().unwrap().downloaded);
    }

    #[tokio::test]
    async fn missing_fields_use_placeholders() {
        let (db, dir) = temp_database("placeholders");
        let library = dir.join("library");
        let item = Claim {
            claim_id: "bare".to_string(),
            url: "lbry://bare".to_string(),
            ..Claim::default()
        };
        db.upsert_claim(&item).unwrap();
        let retriever = MockRetriever::new(&[]);

        let summary = orchestrator(&db, retriever.clone())
            .run_batch(vec![item], &library, 1, Arc::new(LogObserver))
            .await
            .unwrap();

        assert_eq!(summary.verified, 1);
        assert_eq!(retriever.spawned.lock().unwrap().as_slice(), ["Unnamed"]);
        assert!(library.join("Unknown").join("Unknown").join("Unnamed").exists());
    }

    #[tokio::test]
    async fn cancellation_cleans_up_queued_and_in_flight_tasks() {
        let (db, dir) = temp_database("cancel");
        let library = dir.join("library");
        let first = claim("done", "@dev");
        db.upsert_claim(&first).unwrap();
        let hanging: Vec<Claim> = (0..4).map(|i| claim(&format!("h{i}"), "@slow")).collect();
        for item in &hanging {
            db.upsert_claim(item).unwrap();
        }
        let behaviours: Vec<(String, Behaviour)> = hanging
            .iter()
            .map(|item| (item.download_name.clone(), Behaviour::Hang))
            .collect();
        let behaviour_refs: Vec<(&str, Behaviour)> = behaviours
            .iter()
            .map(|(name, behaviour)| (name.as_str(), *behaviour))
            .collect();
        let retriever = MockRetriever::new(&behaviour_refs);
        let orchestrator = orchestrator(&db, retriever.clone());

        let mut batch = vec![first];
        batch.extend(hanging.clone());
        let runner = orchestrator.clone();
        let library_root = library.clone();
        let handle = tokio::spawn(async move {
            runner
                .run_batch(batch, &library_root, 2, Arc::new(LogObserver))
                .await
        });

        // Wait until the hanging retrievals occupy both slots.
        for _ in 0..200 {
            let spawned = retriever.spawned.lock().unwrap().len();
            if spawned >= 3 && retriever.in_flight.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(orchestrator.cancel_all(), 1);

        let summary = handle.await.unwrap().unwrap();
        assert!(summary.was_cancelled);
        assert_eq!(summary.verified, 1);
        assert_eq!(summary.cancelled.len(), 4);
        let cancelled: HashSet<&str> = summary.cancelled.iter().map(String::as_str).collect();
        assert!(cancelled.contains("Game h3"));

        assert!(!library.join("@slow").exists());
        for item in &hanging {
            assert!(!db.fetch_by_id(&item.claim_id).unwrap().unwrap().downloaded);
        }
        assert!(db.fetch_by_id("done").unwrap().unwrap().downloaded);
        assert!(orchestrator.active_batches().is_empty());
    }

    #[test]
    fn cancel_all_drains_registered_processes() {
        let (db, _dir) = temp_database("cancel-registry");
        let processes = ActiveProcesses::new();
        processes.register(u32::MAX - 11, "stale-batch", "ghost");
        let orchestrator = DownloadOrchestrator::new(
            db,
            MockRetriever::new(&[]),
            processes.clone(),
            OrchestratorSettings::default(),
        );

        assert_eq!(orchestrator.cancel_all(), 0);
        assert!(processes.is_empty());
    }
}
