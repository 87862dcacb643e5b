use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use claim_library::commands::{self, CommandResult};
use claim_library::config::ConfigStore;
use claim_library::errors::{ErrorKind, LibraryError};
use claim_library::services::download_orchestrator::{BatchObserver, ProgressUpdate};
use claim_library::services::{BatchSummary, DaemonProgress, ImportSource, ReconcileAction};
use claim_library::utils::paths::{resolve_config_path, resolve_log_dir};
use claim_library::{logging, AppContext};

#[derive(Parser)]
#[command(name = "claim-library")]
#[command(about = "Catalog and download manager for content on the LBRY network")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Probe the local daemon once")]
    Status,
    #[command(about = "Start the daemon, wait for sync and leave it running")]
    StartDaemon,
    #[command(about = "Merge links from a JSON import source into the catalog")]
    Import(ImportArgs),
    #[command(about = "List catalog entries")]
    List(ListArgs),
    #[command(about = "Search names and descriptions")]
    Search(SearchArgs),
    #[command(about = "Download claims by id (Ctrl-C cancels)")]
    Download(DownloadArgs),
    #[command(about = "Attach files already on disk to catalog entries")]
    Scan(ScanArgs),
    #[command(about = "Delete a downloaded file and clear its catalog entry")]
    Delete(PathArgs),
    #[command(about = "Clear every download flag")]
    ResetDownloads,
    #[command(about = "Delete every catalog entry")]
    Erase,
    #[command(about = "Set the library folder")]
    SetLibrary(PathArgs),
    #[command(about = "Set the number of concurrent downloads")]
    SetMaxDownloads(MaxDownloadsArgs),
}

#[derive(Args)]
struct ImportArgs {
    /// JSON file with `publisherLinks` and `individualLinks` arrays.
    source: PathBuf,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    publisher: Option<String>,

    #[arg(long)]
    new: bool,

    #[arg(long)]
    downloaded: bool,
}

#[derive(Args)]
struct SearchArgs {
    term: String,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(required = true)]
    claim_ids: Vec<String>,
}

#[derive(Args)]
struct ScanArgs {
    folder: PathBuf,

    /// Move matches into the library layout instead of keeping them in place.
    #[arg(long = "move")]
    relocate: bool,
}

#[derive(Args)]
struct PathArgs {
    path: PathBuf,
}

#[derive(Args)]
struct MaxDownloadsArgs {
    value: usize,
}

/// Progress lines on stderr so stdout stays machine-readable.
struct ConsoleObserver;

impl BatchObserver for ConsoleObserver {
    fn on_progress(&self, update: &ProgressUpdate) {
        eprintln!(
            "[{}/{}] {:?}: {}",
            update.processed, update.total, update.status, update.name
        );
    }

    fn on_complete(&self, summary: &BatchSummary) {
        eprintln!(
            "done: {} verified, {} failed, {} cancelled",
            summary.verified,
            summary.failed.len(),
            summary.cancelled.len()
        );
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(map_exit_code(err.kind))
        }
    }
}

fn map_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::NotFound | ErrorKind::ConfigError => 2,
        ErrorKind::DaemonStartupError => 3,
        ErrorKind::DownloadFailed => 4,
        ErrorKind::NetworkError | ErrorKind::RemoteResolutionError => 5,
        ErrorKind::StorageError | ErrorKind::IoError => 1,
    }
}

async fn run() -> CommandResult<()> {
    let cli = Cli::parse();

    if let Err(err) = logging::init(&resolve_log_dir()) {
        eprintln!("warning: file logging disabled: {err}");
    }

    let config = ConfigStore::load(resolve_config_path())?;
    tracing::info!(config = %config.path().display(), "claim-library starting");
    let ctx = AppContext::new(config);

    match cli.command {
        Commands::Status => print_json(&commands::daemon::daemon_status(&ctx).await),
        Commands::StartDaemon => {
            let state = commands::daemon::ensure_daemon(&ctx, report_daemon_progress).await?;
            ctx.supervisor.detach();
            print_json(&state)
        }
        Commands::Import(args) => {
            let raw = std::fs::read_to_string(&args.source).map_err(LibraryError::from)?;
            let source: ImportSource = serde_json::from_str(&raw).map_err(LibraryError::from)?;
            print_json(&commands::import::update_catalog(&ctx, &source).await?)
        }
        Commands::List(args) => {
            if let Some(publisher) = args.publisher {
                print_json(&commands::catalog::fetch_files_by_publisher(&ctx, &publisher)?)
            } else if args.new {
                print_json(&commands::catalog::fetch_new_files(&ctx)?)
            } else if args.downloaded {
                print_json(&commands::catalog::fetch_downloaded_files(&ctx)?)
            } else {
                print_json(&commands::catalog::fetch_all_files(&ctx)?)
            }
        }
        Commands::Search(args) => print_json(&commands::catalog::search_files(&ctx, &args.term)?),
        Commands::Download(args) => download(&ctx, &args.claim_ids).await,
        Commands::Scan(args) => {
            let found = commands::scan::scan_folder(&ctx, &args.folder.to_string_lossy())?;
            let action = if args.relocate {
                ReconcileAction::Move
            } else {
                ReconcileAction::Keep
            };
            print_json(&commands::scan::process_scanned_files(&ctx, &found, action)?)
        }
        Commands::Delete(args) => {
            print_json(&commands::catalog::delete_file(&ctx, &args.path.to_string_lossy())?)
        }
        Commands::ResetDownloads => print_json(&commands::catalog::reset_downloads(&ctx)?),
        Commands::Erase => print_json(&commands::catalog::erase_catalog(&ctx)?),
        Commands::SetLibrary(args) => print_json(&commands::settings::set_library_folder(
            &ctx,
            &args.path.to_string_lossy(),
        )?),
        Commands::SetMaxDownloads(args) => {
            print_json(&commands::settings::set_max_downloads(&ctx, args.value)?)
        }
    }
}

async fn download(ctx: &AppContext, claim_ids: &[String]) -> CommandResult<()> {
    let batch = commands::download::download_files(
        ctx,
        claim_ids,
        report_daemon_progress,
        Arc::new(ConsoleObserver),
    );
    tokio::pin!(batch);

    let summary = tokio::select! {
        result = &mut batch => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("cancelling downloads...");
            if commands::download::cancel_downloads(ctx) == 0 {
                return Err(LibraryError::DownloadFailed(
                    "interrupted before any download started".to_string(),
                )
                .into());
            }
            batch.await?
        }
    };

    print_json(&summary)?;
    if summary.failed.is_empty() {
        Ok(())
    } else {
        Err(LibraryError::DownloadFailed(format!(
            "{} of {} downloads failed",
            summary.failed.len(),
            summary.total
        ))
        .into())
    }
}

fn report_daemon_progress(progress: DaemonProgress) {
    eprintln!("{progress}");
}

fn print_json<T: Serialize>(value: &T) -> CommandResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(LibraryError::from)?;
    println!("{rendered}");
    Ok(())
}
