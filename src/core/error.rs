//! Error handling for upkeeper.
//!
//! The error system is built around a single strongly-typed enum,
//! [`UpdateError`], covering every failure class an update run can produce
//! plus the two precondition rejections that never enter the state machine
//! at all.
//!
//! # Failure classes and their consequences
//!
//! | Variant | Raised | Consequence |
//! |---------|--------|-------------|
//! | [`Resolution`] | catalog unreachable, empty, or malformed | run aborts, nothing touched |
//! | [`Download`] | transport failure or bad status while fetching | run aborts before backup |
//! | [`Backup`] | snapshot of the current deployment failed | run aborts before anything is stopped |
//! | [`Packaging`] | expected file missing inside the extracted bundle | rollback once the backend has been stopped |
//! | [`Process`] | new backend failed to start or exited during the health wait | rollback |
//! | [`HealthTimeout`] | health endpoint never answered 200 within budget | rollback |
//! | [`Rollback`] | restore or restart-of-old failed after a rollback attempt | logged and surfaced, never fatal to the updater |
//! | [`Unauthorized`] | trigger/log request without an allow from the auth gate | synchronous 403, no state change |
//! | [`AlreadyInProgress`] | trigger while a run is in flight | synchronous 409, no state change |
//!
//! Components themselves return [`anyhow::Result`] with context attached the
//! usual way; the orchestrator converts at the stage boundary so the final
//! error string recorded in the shared status is always one of these shapes.
//!
//! [`Resolution`]: UpdateError::Resolution
//! [`Download`]: UpdateError::Download
//! [`Backup`]: UpdateError::Backup
//! [`Packaging`]: UpdateError::Packaging
//! [`Process`]: UpdateError::Process
//! [`HealthTimeout`]: UpdateError::HealthTimeout
//! [`Rollback`]: UpdateError::Rollback
//! [`Unauthorized`]: UpdateError::Unauthorized
//! [`AlreadyInProgress`]: UpdateError::AlreadyInProgress

use thiserror::Error;

/// The error type for update runs and trigger preconditions.
///
/// Variants map one-to-one onto the failure classes of the update state
/// machine. The `Display` output is written for end users: it is what lands
/// in `UpdateState.last_error` and in API responses.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The release catalog was unreachable, returned a non-2xx status, or
    /// produced malformed metadata.
    ///
    /// Callers deliberately cannot distinguish "no release exists" from
    /// "catalog unreachable"; both block the update attempt identically.
    #[error("release resolution failed: {reason}")]
    Resolution {
        /// Human-readable description of what went wrong.
        reason: String,
    },

    /// Downloading the update bundle failed.
    ///
    /// Covers transport errors, non-2xx responses, and checksum mismatches
    /// detected before anything on disk has been replaced.
    #[error("download failed: {reason}")]
    Download {
        /// Human-readable description of what went wrong.
        reason: String,
    },

    /// Snapshotting the current deployment failed.
    ///
    /// Raised before the backend is stopped, so the run aborts with the
    /// previous deployment still fully intact.
    #[error("backup failed: {reason}")]
    Backup {
        /// Human-readable description of what went wrong.
        reason: String,
    },

    /// The extracted bundle is missing an expected file, or extraction
    /// itself failed.
    #[error("update bundle incomplete: {reason}")]
    Packaging {
        /// What was expected and not found.
        reason: String,
    },

    /// The new backend failed to start, or exited while the health gate was
    /// still waiting for it.
    #[error("backend process failed: {reason}")]
    Process {
        /// Human-readable description, including the exit code when known.
        reason: String,
    },

    /// The health endpoint never returned 200 within the configured budget.
    #[error("health check failed after {waited_secs}s; rolled back to the previous version")]
    HealthTimeout {
        /// How long the gate waited before giving up, in seconds.
        waited_secs: u64,
    },

    /// A rollback was attempted and did not fully succeed.
    ///
    /// The system may be left in a degraded state requiring manual
    /// intervention. This is surfaced, not hidden, and is never fatal to the
    /// updater process itself.
    #[error("update failed and rollback did not complete cleanly: {reason}")]
    Rollback {
        /// The original failure plus the rollback failure, combined.
        reason: String,
    },

    /// The authorization gate denied the request.
    ///
    /// Returned synchronously to the trigger; the state machine is never
    /// entered.
    #[error("admin authorization required")]
    Unauthorized,

    /// An update run is already in flight.
    ///
    /// Returned synchronously to the trigger; the single-flight guard
    /// rejects the request with no state change.
    #[error("an update is already in progress")]
    AlreadyInProgress,
}

impl UpdateError {
    /// Build a [`Resolution`](Self::Resolution) error from any displayable cause.
    pub fn resolution(err: impl std::fmt::Display) -> Self {
        Self::Resolution { reason: format!("{err:#}") }
    }

    /// Build a [`Download`](Self::Download) error from any displayable cause.
    pub fn download(err: impl std::fmt::Display) -> Self {
        Self::Download { reason: format!("{err:#}") }
    }

    /// Build a [`Backup`](Self::Backup) error from any displayable cause.
    pub fn backup(err: impl std::fmt::Display) -> Self {
        Self::Backup { reason: format!("{err:#}") }
    }

    /// Build a [`Packaging`](Self::Packaging) error from any displayable cause.
    pub fn packaging(err: impl std::fmt::Display) -> Self {
        Self::Packaging { reason: format!("{err:#}") }
    }

    /// Build a [`Process`](Self::Process) error from any displayable cause.
    pub fn process(err: impl std::fmt::Display) -> Self {
        Self::Process { reason: format!("{err:#}") }
    }
}
