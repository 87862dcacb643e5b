use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::models::Claim;

const UNKNOWN_FOLDER: &str = "Unknown";

pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    if let Some(parent) = temp_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    fs::rename(temp_path, path)?;
    Ok(())
}

/// Removes `dir` only when it exists and is empty. Never fails: a missing or
/// populated directory is left alone and reported as `false`.
pub fn remove_dir_if_empty(dir: &Path) -> bool {
    let is_empty = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => return false,
    };
    if !is_empty {
        return false;
    }
    match fs::remove_dir(dir) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(path = %dir.display(), "empty directory not removed: {err}");
            false
        }
    }
}

/// Removes the item folder and then its publisher folder, each only if empty.
pub fn cleanup_folders(item_dir: &Path, publisher_dir: &Path) {
    remove_dir_if_empty(item_dir);
    remove_dir_if_empty(publisher_dir);
}

/// Moves a file, falling back to copy + remove when a rename is not possible
/// (for example across mount points).
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                "rename failed, copying instead: {rename_err}"
            );
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

pub fn sanitize_folder_name(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|ch| !matches!(ch, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();
    cleaned.trim().to_string()
}

/// `{library}/{publisher}/{alternate name}` for a claim, with "Unknown"
/// standing in for missing parts. Returns (publisher dir, item dir).
pub fn claim_dirs(library_root: &Path, claim: &Claim) -> (PathBuf, PathBuf) {
    let publisher = non_empty(sanitize_folder_name(&claim.publisher));
    let folder = non_empty(sanitize_folder_name(&claim.alt_name));
    let publisher_dir = library_root.join(publisher);
    let item_dir = publisher_dir.join(folder);
    (publisher_dir, item_dir)
}

fn non_empty(value: String) -> String {
    if value.is_empty() {
        UNKNOWN_FOLDER.to_string()
    } else {
        value
    }
}
