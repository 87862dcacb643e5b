use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::errors::{LibraryError, Result};
use crate::utils::file::write_atomic;

pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 5;
pub const MAX_CONCURRENT_DOWNLOADS_CEILING: usize = 64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub library_folder: Option<String>,
    pub max_concurrent_downloads: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_folder: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }
}

impl AppConfig {
    pub fn library_path(&self) -> Option<PathBuf> {
        self.library_folder
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    }

    fn normalized(mut self) -> Self {
        self.max_concurrent_downloads = clamp_downloads(self.max_concurrent_downloads);
        self
    }
}

pub fn clamp_downloads(value: usize) -> usize {
    value.clamp(1, MAX_CONCURRENT_DOWNLOADS_CEILING)
}

/// Persisted `config.json`, rewritten whenever a value changes.
#[derive(Clone)]
pub struct ConfigStore {
    path: PathBuf,
    current: Arc<Mutex<AppConfig>>,
}

impl ConfigStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<AppConfig>(&raw) {
                Ok(config) => config.normalized(),
                Err(err) => {
                    tracing::warn!(path = %path.display(), "config unreadable, using defaults: {err}");
                    AppConfig::default()
                }
            }
        } else {
            AppConfig::default()
        };

        let store = Self {
            path,
            current: Arc::new(Mutex::new(config)),
        };
        if !store.path.exists() {
            store.persist(&store.get())?;
        }
        Ok(store)
    }

    pub fn get(&self) -> AppConfig {
        self.lock().clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_library_folder(&self, folder: &str) -> Result<AppConfig> {
        let trimmed = folder.trim();
        if trimmed.is_empty() {
            return Err(LibraryError::Config("library folder must not be empty".to_string()));
        }
        self.update(|config| config.library_folder = Some(trimmed.to_string()))
    }

    pub fn set_max_concurrent_downloads(&self, value: usize) -> Result<AppConfig> {
        if value == 0 {
            return Err(LibraryError::Config(
                "maxConcurrentDownloads must be a positive integer".to_string(),
            ));
        }
        self.update(|config| config.max_concurrent_downloads = clamp_downloads(value))
    }

    fn update(&self, apply: impl FnOnce(&mut AppConfig)) -> Result<AppConfig> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        apply(&mut next);
        if next != *guard {
            self.persist(&next)?;
            *guard = next.clone();
            tracing::info!(
                library_folder = ?next.library_folder,
                max_concurrent_downloads = next.max_concurrent_downloads,
                "config updated"
            );
        }
        Ok(next)
    }

    fn persist(&self, config: &AppConfig) -> Result<()> {
        let payload = serde_json::to_vec_pretty(config)?;
        write_atomic(&self.path, &payload)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, AppConfig> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_dir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = temp_dir("config-default");
        let path = dir.join("config.json");
        let store = ConfigStore::load(path.clone()).unwrap();
        assert_eq!(store.get(), AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn values_survive_reload_and_are_clamped() {
        let dir = temp_dir("config-reload");
        let path = dir.join("config.json");
        let store = ConfigStore::load(path.clone()).unwrap();
        store.set_library_folder("/data/library").unwrap();
        store.set_max_concurrent_downloads(500).unwrap();

        let reloaded = ConfigStore::load(path).unwrap().get();
        assert_eq!(reloaded.library_folder.as_deref(), Some("/data/library"));
        assert_eq!(reloaded.max_concurrent_downloads, MAX_CONCURRENT_DOWNLOADS_CEILING);
        assert!(store.set_max_concurrent_downloads(0).is_err());
    }

    #[test]
    fn malformed_or_partial_files_fall_back_to_defaults() {
        let dir = temp_dir("config-partial");
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"libraryFolder":"/lib","theme":"dark"}"#).unwrap();
        let config = ConfigStore::load(path.clone()).unwrap().get();
        assert_eq!(config.library_folder.as_deref(), Some("/lib"));
        assert_eq!(config.max_concurrent_downloads, DEFAULT_MAX_CONCURRENT_DOWNLOADS);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(ConfigStore::load(path).unwrap().get(), AppConfig::default());
    }
}
