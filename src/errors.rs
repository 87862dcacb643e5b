use std::io;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Daemon failed to start: {0}")]
    DaemonStartup(String),
    #[error("Remote resolution failed: {0}")]
    RemoteResolution(String),
    #[error("Download failed: {0}")]
    DownloadFailed(String),
}

/// Stable tag the presentation layer branches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    DaemonStartupError,
    StorageError,
    NotFound,
    DownloadFailed,
    RemoteResolutionError,
    NetworkError,
    ConfigError,
    IoError,
}

impl LibraryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LibraryError::Network(_) | LibraryError::Http(_) => ErrorKind::NetworkError,
            LibraryError::Storage(_) => ErrorKind::StorageError,
            LibraryError::Io(_) => ErrorKind::IoError,
            LibraryError::Serde(_) | LibraryError::Config(_) => ErrorKind::ConfigError,
            LibraryError::NotFound(_) => ErrorKind::NotFound,
            LibraryError::DaemonStartup(_) => ErrorKind::DaemonStartupError,
            LibraryError::RemoteResolution(_) => ErrorKind::RemoteResolutionError,
            LibraryError::DownloadFailed(_) => ErrorKind::DownloadFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
