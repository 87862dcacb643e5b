use std::path::Path;

use crate::app::AppContext;
use crate::commands::CommandResult;
use crate::config::AppConfig;
use crate::errors::LibraryError;
use crate::services::LibraryService;

pub fn get_config(ctx: &AppContext) -> AppConfig {
    ctx.config.get()
}

/// Prepares the catalog in `folder`, then points the application at it.
/// The stored setting is left alone when the folder cannot be prepared.
pub fn set_library_folder(ctx: &AppContext, folder: &str) -> CommandResult<AppConfig> {
    let trimmed = folder.trim();
    if trimmed.is_empty() {
        return Err(LibraryError::Config("library folder must not be empty".to_string()).into());
    }
    LibraryService::ensure_library(Path::new(trimmed))?;
    let config = ctx.config.set_library_folder(trimmed)?;
    tracing::info!(folder = %trimmed, "library folder set");
    Ok(config)
}

pub fn set_max_downloads(ctx: &AppContext, value: usize) -> CommandResult<AppConfig> {
    Ok(ctx.config.set_max_concurrent_downloads(value)?)
}
