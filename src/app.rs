use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ConfigStore;
use crate::db::Database;
use crate::errors::{LibraryError, Result};
use crate::services::{
    resolve_daemon_executable, ActiveProcesses, ClaimDirectory, DaemonControl, DaemonRetriever,
    DaemonSupervisor, DownloadOrchestrator, FilesystemReconciler, LbrynetDaemon, LibraryService,
    MetadataImporter, OrchestratorSettings, ProxyDirectory, Retriever, SupervisorSettings,
};
use crate::utils::paths::{daemon_api_url, proxy_url};

/// Everything a command needs. Catalog-bound services are built against the
/// library folder currently configured, so changing the folder takes effect
/// on the next command.
pub struct AppContext {
    pub config: ConfigStore,
    pub processes: ActiveProcesses,
    pub supervisor: DaemonSupervisor,
    directory: Arc<dyn ClaimDirectory>,
    retriever: Arc<dyn Retriever>,
    orchestrator: Mutex<Option<(PathBuf, DownloadOrchestrator)>>,
}

impl AppContext {
    /// Wires the real daemon, retriever and proxy from the environment.
    pub fn new(config: ConfigStore) -> Self {
        let executable = resolve_daemon_executable();
        tracing::info!(path = %executable.display(), "using lbrynet executable");
        let daemon = Arc::new(LbrynetDaemon::new(daemon_api_url(), executable.clone()));
        Self::with_parts(
            config,
            daemon,
            Arc::new(ProxyDirectory::new(proxy_url())),
            Arc::new(DaemonRetriever::new(executable)),
        )
    }

    pub fn with_parts(
        config: ConfigStore,
        daemon: Arc<dyn DaemonControl>,
        directory: Arc<dyn ClaimDirectory>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self {
            config,
            processes: ActiveProcesses::new(),
            supervisor: DaemonSupervisor::new(daemon, SupervisorSettings::default()),
            directory,
            retriever,
            orchestrator: Mutex::new(None),
        }
    }

    pub fn library_root(&self) -> Result<PathBuf> {
        self.config.get().library_path().ok_or_else(|| {
            LibraryError::Config("no library folder configured".to_string())
        })
    }

    /// Catalog of the configured library, created on first use.
    pub fn database(&self) -> Result<Database> {
        LibraryService::ensure_library(&self.library_root()?)
    }

    pub fn library(&self) -> Result<LibraryService> {
        Ok(LibraryService::new(self.database()?))
    }

    pub fn importer(&self) -> Result<MetadataImporter> {
        Ok(MetadataImporter::new(self.database()?, self.directory.clone()))
    }

    pub fn reconciler(&self) -> Result<FilesystemReconciler> {
        Ok(FilesystemReconciler::new(self.database()?, self.library_root()?))
    }

    /// The orchestrator for the configured library. Reused while the folder
    /// stays the same so batches started earlier remain cancellable.
    pub fn orchestrator(&self) -> Result<DownloadOrchestrator> {
        let root = self.library_root()?;
        let mut slot = self.lock_orchestrator();
        if let Some((cached_root, orchestrator)) = slot.as_ref() {
            if *cached_root == root {
                return Ok(orchestrator.clone());
            }
        }
        let orchestrator = DownloadOrchestrator::new(
            LibraryService::ensure_library(&root)?,
            self.retriever.clone(),
            self.processes.clone(),
            OrchestratorSettings::default(),
        );
        *slot = Some((root, orchestrator.clone()));
        Ok(orchestrator)
    }

    /// Cancels running batches and kills every registered retrieval process.
    pub fn cancel_downloads(&self) -> usize {
        let cached = self.lock_orchestrator().as_ref().map(|(_, orchestrator)| orchestrator.clone());
        match cached {
            Some(orchestrator) => orchestrator.cancel_all(),
            None => {
                self.processes.kill_all();
                0
            }
        }
    }

    fn lock_orchestrator(&self) -> MutexGuard<'_, Option<(PathBuf, DownloadOrchestrator)>> {
        match self.orchestrator.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
