pub mod catalog;
pub mod daemon;
pub mod download;
pub mod import;
pub mod scan;
pub mod settings;

use std::fmt;

use serde::Serialize;

use crate::errors::{ErrorKind, LibraryError};

/// The only error the presentation layer ever sees: a tag to branch on plus
/// a message fit for display.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<LibraryError> for CommandError {
    fn from(err: LibraryError) -> Self {
        let kind = err.kind();
        tracing::error!(kind = ?kind, "command failed: {err}");
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CommandError {}

pub type CommandResult<T> = std::result::Result<T, CommandError>;
