use std::fs;
use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::errors::{LibraryError, Result};

/// Prefix of the daily log files; the appender adds the date suffix.
pub const LOG_FILE_PREFIX: &str = "library.log";

// Our own events at info, dependencies (reqwest, rusqlite) only when they warn.
const DEFAULT_DIRECTIVES: &str = "warn,claim_library=info";

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// `RUST_LOG` when it parses, otherwise the default directives.
pub fn resolve_filter(directives: Option<&str>) -> EnvFilter {
    match directives.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => EnvFilter::try_new(value).unwrap_or_else(|err| {
            eprintln!("warning: ignoring RUST_LOG={value}: {err}");
            EnvFilter::new(DEFAULT_DIRECTIVES)
        }),
        None => EnvFilter::new(DEFAULT_DIRECTIVES),
    }
}

/// Installs the global subscriber: everything the filter allows goes to a
/// daily file under `log_dir`, and warnings are echoed to stderr so CLI
/// users see them next to the JSON on stdout.
pub fn init(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Err(LibraryError::Config("logging is already initialised".to_string()));
    }

    let filter = resolve_filter(std::env::var("RUST_LOG").ok().as_deref());

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| LibraryError::Config(err.to_string()))?;

    tracing::debug!(dir = %log_dir.display(), "file logging ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_keeps_crate_events_at_info() {
        let rendered = resolve_filter(None).to_string();
        assert!(rendered.contains("claim_library=info"));
        assert!(rendered.contains("warn"));

        assert_eq!(resolve_filter(Some("  ")).to_string(), rendered);
    }

    #[test]
    fn invalid_directives_fall_back_to_default() {
        let fallback = resolve_filter(Some("claim_library=loudest")).to_string();
        assert_eq!(fallback, resolve_filter(None).to_string());

        assert_eq!(resolve_filter(Some("debug")).to_string(), "debug");
    }
}
