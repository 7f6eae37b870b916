//! Backup and restore of the deployed artifacts.
//!
//! Before an update touches anything, [`BackupManager::snapshot`] captures
//! the current deployment (backend artifact, served frontend tree, version
//! record) into a timestamp-named [`BackupUnit`] under the backups
//! directory. [`BackupManager::restore`] is the inverse and is the engine
//! of rollback.
//!
//! Every sub-step of both operations is independently optional: a first
//! deployment has nothing to back up, and a unit only restores what it
//! actually contains. Restore is idempotent; it can run after a
//! partially-completed update, and running it twice leaves the same on-disk
//! state as running it once.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::archive::Archiver;
use crate::utils;

/// Fixed file names inside a backup unit.
const FRONTEND_ARCHIVE: &str = "frontend.tar.gz";
const VERSION_FILE: &str = "version.json";

/// One immutable, self-contained snapshot, identified by its creation
/// timestamp.
#[derive(Debug, Clone)]
pub struct BackupUnit {
    dir: PathBuf,
}

impl BackupUnit {
    /// Wrap an existing unit directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The unit's directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The unit's timestamp name, e.g. `20250601_143000`.
    pub fn name(&self) -> String {
        self.dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
    }

    fn artifact_copy(&self, artifact_name: &str) -> PathBuf {
        self.dir.join(artifact_name)
    }

    fn frontend_archive(&self) -> PathBuf {
        self.dir.join(FRONTEND_ARCHIVE)
    }

    fn version_copy(&self) -> PathBuf {
        self.dir.join(VERSION_FILE)
    }
}

/// Creates and restores [`BackupUnit`]s for one deployment layout.
pub struct BackupManager {
    backups_dir: PathBuf,
    backend_artifact: PathBuf,
    frontend_dir: PathBuf,
    version_file: PathBuf,
    archiver: Arc<dyn Archiver>,
}

impl BackupManager {
    /// Create a manager for the given deployment layout.
    ///
    /// `backend_artifact` is the installed backend file, `frontend_dir` the
    /// served static tree, `version_file` the persisted version record.
    pub fn new(
        backups_dir: impl Into<PathBuf>,
        backend_artifact: impl Into<PathBuf>,
        frontend_dir: impl Into<PathBuf>,
        version_file: impl Into<PathBuf>,
        archiver: Arc<dyn Archiver>,
    ) -> Self {
        Self {
            backups_dir: backups_dir.into(),
            backend_artifact: backend_artifact.into(),
            frontend_dir: frontend_dir.into(),
            version_file: version_file.into(),
            archiver,
        }
    }

    fn artifact_name(&self) -> String {
        self.backend_artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "backend.bin".to_string())
    }

    /// Snapshot the current deployment into a fresh timestamped unit.
    ///
    /// Absent sources are skipped, not errors: each of the three sub-steps
    /// runs only if its source exists.
    pub async fn snapshot(&self) -> Result<BackupUnit> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let unit = BackupUnit::at(self.backups_dir.join(timestamp));
        fs::create_dir_all(unit.dir())
            .await
            .with_context(|| format!("Failed to create backup directory {}", unit.dir().display()))?;

        info!("Creating backup {}", unit.name());

        if self.backend_artifact.exists() {
            fs::copy(&self.backend_artifact, unit.artifact_copy(&self.artifact_name()))
                .await
                .context("Failed to back up backend artifact")?;
        }

        if self.frontend_dir.exists() {
            self.archiver
                .create(&self.frontend_dir, &unit.frontend_archive())
                .await
                .context("Failed to back up frontend tree")?;
        }

        if self.version_file.exists() {
            fs::copy(&self.version_file, unit.version_copy())
                .await
                .context("Failed to back up version record")?;
        }

        info!("Backup complete: {}", unit.dir().display());
        Ok(unit)
    }

    /// Restore a unit back into place.
    ///
    /// The frontend tree is fully replaced (delete, recreate, extract),
    /// never merged, so a half-written tree from an interrupted update
    /// cannot survive. Safe to call repeatedly on the same unit.
    pub async fn restore(&self, unit: &BackupUnit) -> Result<()> {
        info!("Restoring backup {}", unit.name());

        let artifact_copy = unit.artifact_copy(&self.artifact_name());
        if artifact_copy.exists() {
            fs::copy(&artifact_copy, &self.backend_artifact)
                .await
                .context("Failed to restore backend artifact")?;
        }

        let frontend_archive = unit.frontend_archive();
        if frontend_archive.exists() {
            let frontend_dir = self.frontend_dir.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                utils::fs::remove_dir_all(&frontend_dir)?;
                utils::fs::ensure_dir(&frontend_dir)
            })
            .await
            .context("restore task panicked")??;

            self.archiver
                .extract(&frontend_archive, &self.frontend_dir)
                .await
                .context("Failed to restore frontend tree")?;
        }

        let version_copy = unit.version_copy();
        if version_copy.exists() {
            fs::copy(&version_copy, &self.version_file)
                .await
                .context("Failed to restore version record")?;
        }

        info!("Backup {} restored", unit.name());
        Ok(())
    }

    /// All existing units, oldest first.
    pub fn list(&self) -> Result<Vec<BackupUnit>> {
        Ok(utils::fs::sorted_subdirs(&self.backups_dir)?.into_iter().map(BackupUnit::at).collect())
    }

    /// Remove all but the newest `keep` units.
    ///
    /// `keep == 0` disables pruning entirely; units are then retained until
    /// removed by hand.
    pub async fn prune(&self, keep: usize) -> Result<()> {
        if keep == 0 {
            return Ok(());
        }

        let units = self.list()?;
        if units.len() <= keep {
            return Ok(());
        }

        let excess = units.len() - keep;
        for unit in &units[..excess] {
            debug!("Pruning backup {}", unit.name());
            if let Err(e) = fs::remove_dir_all(unit.dir()).await {
                // Pruning is housekeeping; a stuck unit shouldn't fail the run.
                warn!("Failed to prune backup {}: {e}", unit.name());
            }
        }
        Ok(())
    }
}
