use std::path::{Path, PathBuf};

use directories::ProjectDirs;

pub const DEFAULT_DAEMON_API_URL: &str = "http://localhost:5279";
pub const DEFAULT_PROXY_URL: &str = "https://api.lbry.tv/api/v1/proxy";

fn ensure_dir(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    if std::fs::create_dir_all(path).is_ok() {
        return Some(path.to_path_buf());
    }
    None
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

fn is_portable_root(path: &Path) -> bool {
    path.join("config.json").exists()
}

/// Application root holding `config.json` and `logs/`.
pub fn resolve_root_dir() -> PathBuf {
    if let Some(value) = env_value("CLAIM_LIBRARY_ROOT_DIR") {
        if let Some(dir) = ensure_dir(&PathBuf::from(value)) {
            return dir;
        }
    }

    if let Some(dir) = exe_dir() {
        if is_portable_root(&dir) {
            return dir;
        }
    }

    if let Some(project) = ProjectDirs::from("", "", "claim-library") {
        if let Some(found) = ensure_dir(project.data_dir()) {
            return found;
        }
    }

    PathBuf::from(".")
}

pub fn resolve_config_path() -> PathBuf {
    resolve_root_dir().join("config.json")
}

pub fn resolve_log_dir() -> PathBuf {
    if let Some(value) = env_value("CLAIM_LIBRARY_LOG_DIR") {
        if let Some(dir) = ensure_dir(&PathBuf::from(value)) {
            return dir;
        }
    }

    let root_logs = resolve_root_dir().join("logs");
    if let Some(found) = ensure_dir(&root_logs) {
        return found;
    }

    PathBuf::from("logs")
}

/// Directories searched for the bundled daemon folders.
pub fn asset_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(dir) = exe_dir() {
        dirs.push(dir.join("assets"));
        if let Some(parent) = dir.parent() {
            dirs.push(parent.join("assets"));
        }
    }
    dirs.push(resolve_root_dir().join("assets"));
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join("assets"));
    }
    dirs.dedup();
    dirs
}

pub fn daemon_api_url() -> String {
    env_value("LBRYNET_API_URL").unwrap_or_else(|| DEFAULT_DAEMON_API_URL.to_string())
}

pub fn proxy_url() -> String {
    env_value("LBRY_PROXY_URL").unwrap_or_else(|| DEFAULT_PROXY_URL.to_string())
}

pub fn daemon_path_override() -> Option<PathBuf> {
    env_value("LBRYNET_PATH").map(PathBuf::from)
}
