pub mod daemon_supervisor;
pub mod download_orchestrator;
pub mod filesystem_reconciler;
pub mod library_service;
pub mod metadata_importer;
pub mod process_registry;
pub mod rpc_client;

pub use daemon_supervisor::{
    resolve_daemon_executable, DaemonControl, DaemonProgress, DaemonState, DaemonSupervisor,
    LbrynetDaemon, SupervisorSettings,
};
pub use download_orchestrator::{
    BatchObserver, BatchSummary, DaemonRetriever, DownloadOrchestrator, LogObserver,
    OrchestratorSettings, ProgressUpdate, Retriever,
};
pub use filesystem_reconciler::{FilesystemReconciler, ReconcileAction, ReconciledFile};
pub use library_service::LibraryService;
pub use metadata_importer::{ClaimDirectory, ImportSource, ImportSummary, MetadataImporter, ProxyDirectory};
pub use process_registry::ActiveProcesses;
pub use rpc_client::RpcClient;
