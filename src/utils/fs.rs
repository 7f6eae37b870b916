//! Filesystem helpers for deployment file management.
//!
//! These are small synchronous wrappers over [`std::fs`] with error context
//! attached. Callers in async code route the recursive operations through
//! `tokio::task::spawn_blocking`; trees being copied here are deployment
//! trees (a frontend bundle, a backup unit), not arbitrary user data.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Create a directory and all parents if they don't already exist.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Recursively copy a directory tree.
///
/// Creates the destination if missing, overwrites existing files, and skips
/// symlinks and special files. Used to install the bundle's frontend tree
/// and to restore one from a backup unit.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;

    for entry in
        fs::read_dir(src).with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            fs::copy(&src_path, &dst_path).with_context(|| {
                format!(
                    "Failed to copy file from {} to {}",
                    src_path.display(),
                    dst_path.display()
                )
            })?;
        }
        // Skip symlinks and other file types
    }

    Ok(())
}

/// Remove a directory tree, succeeding silently if it doesn't exist.
///
/// Safe for cleanup paths that may run after a partially-completed update.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove a file, succeeding silently if it doesn't exist.
pub fn remove_file(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove file: {}", path.display()))?;
    }
    Ok(())
}

/// Read the last `limit` lines of a text file.
///
/// Returns an empty string if the file doesn't exist. Used for the bounded
/// log tails quoted in health-gate diagnostics and served by the log
/// endpoint.
pub fn tail_lines(path: &Path, limit: usize) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read log file: {}", path.display()))?;

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(limit);
    Ok(lines[start..].join("\n"))
}

/// List immediate subdirectories of `path`, sorted by name.
///
/// Backup units are timestamp-named, so lexicographic order is creation
/// order.
pub fn sorted_subdirs(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut dirs: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("Failed to read directory: {}", path.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    dirs.sort();
    Ok(dirs)
}
