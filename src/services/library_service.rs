use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::db::queries::ClaimQueries;
use crate::db::{self, Database};
use crate::errors::Result;
use crate::utils::file::cleanup_folders;

/// Catalog maintenance that touches both the library folder and the store.
#[derive(Clone)]
pub struct LibraryService {
    db: Database,
}

impl LibraryService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens the catalog inside `library_folder`, creating folder and schema
    /// when they do not exist yet.
    pub fn ensure_library(library_folder: &Path) -> Result<Database> {
        db::init(library_folder)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Deletes a downloaded file, prunes its now-empty item and publisher
    /// folders and clears the download flag of the row pointing at it.
    /// A file that is already gone still clears the row.
    pub fn delete_downloaded_file(&self, path: &Path) -> Result<usize> {
        match fs::remove_file(path) {
            Ok(()) => tracing::info!(path = %path.display(), "deleted downloaded file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "file already missing, clearing catalog entry");
            }
            Err(err) => return Err(err.into()),
        }

        if let Some(item_dir) = path.parent() {
            let publisher_dir = item_dir.parent().map(Path::to_path_buf).unwrap_or_else(PathBuf::new);
            cleanup_folders(item_dir, &publisher_dir);
        }

        let cleared = self.db.clear_download(&path.to_string_lossy())?;
        if cleared == 0 {
            tracing::debug!(path = %path.display(), "no catalog entry referenced deleted file");
        }
        Ok(cleared)
    }

    pub fn reset_downloads(&self) -> Result<usize> {
        let count = self.db.reset_downloads()?;
        tracing::info!(count, "download flags reset");
        Ok(count)
    }

    pub fn erase_catalog(&self) -> Result<usize> {
        let count = self.db.erase_catalog()?;
        tracing::warn!(count, "catalog erased");
        Ok(count)
    }
}
