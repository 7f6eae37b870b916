//! Persisted version record.
//!
//! The deployed version is described by a small JSON file
//! (`version.json`) shipped inside every update bundle. It is the single
//! source of truth for "what is currently running" and is only ever
//! replaced wholesale; by a successful commit, or by a rollback restoring
//! the pre-update copy.
//!
//! A missing or corrupt record is not an error: reads degrade to the
//! sentinel [`VersionRecord::unknown`] so a first deployment (or a mangled
//! file) never blocks version queries or update checks.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

/// The persisted `{version, tag, buildTime}` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionRecord {
    /// Bare version number, e.g. `1.2.0`.
    pub version: String,
    /// Release tag as published, e.g. `v1.2.0`.
    pub tag: String,
    /// Build timestamp string as written by the release pipeline.
    pub build_time: String,
}

impl Default for VersionRecord {
    fn default() -> Self {
        Self::unknown()
    }
}

impl VersionRecord {
    /// The sentinel record used when no version file exists or it cannot be
    /// parsed.
    pub fn unknown() -> Self {
        Self {
            version: "unknown".to_string(),
            tag: "unknown".to_string(),
            build_time: String::new(),
        }
    }
}

/// Reads and writes the version record file.
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    /// Create a store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current record, degrading to [`VersionRecord::unknown`] on
    /// absence or corruption.
    ///
    /// Read failures are logged, never propagated; a broken version file
    /// must not take down version queries.
    pub fn load(&self) -> VersionRecord {
        if !self.path.exists() {
            return VersionRecord::unknown();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(record) => record,
                Err(e) => {
                    error!("Failed to parse version record {}: {e}", self.path.display());
                    VersionRecord::unknown()
                }
            },
            Err(e) => {
                error!("Failed to read version record {}: {e}", self.path.display());
                VersionRecord::unknown()
            }
        }
    }

    /// The bare version string of the current deployment.
    pub fn current_version(&self) -> String {
        self.load().version
    }

    /// Write a record, creating parent directories as needed.
    pub fn save(&self, record: &VersionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            crate::utils::fs::ensure_dir(parent)?;
        }
        let content =
            serde_json::to_string_pretty(record).context("Failed to serialize version record")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write version record: {}", self.path.display()))
    }
}
