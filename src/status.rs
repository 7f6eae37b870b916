//! Shared update status.
//!
//! A single [`UpdateState`] instance is shared between the background update
//! run (the only writer) and concurrent status queries (readers). The state
//! lives behind a [`StatusHandle`], which exposes snapshot reads and the
//! writer-side transitions, including the single-flight guard that admits at
//! most one run at a time.
//!
//! # Concurrency model
//!
//! Readers never act on stale data beyond display purposes, so field-level
//! visibility through an `RwLock` is sufficient; there is no transactional
//! requirement. [`StatusHandle::get`] clones the current snapshot; writers
//! replace fields under the write lock.
//!
//! # Guard discipline
//!
//! [`StatusHandle::begin`] is the only way to set `in_progress`, and
//! [`StatusHandle::finish`] is the only way to clear it. The orchestrator
//! calls `finish` from a finalizer that runs on every exit path, so a
//! forgotten reset on some error branch cannot leave the guard stuck.

use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::core::UpdateError;

/// Snapshot of the current update run, serialized for the status endpoint.
///
/// Lifecycle: reset to idle at process start, `in_progress` from trigger
/// until the run finalizer fires, then idle again with either `progress ==
/// 100` (success) or a non-empty `last_error`.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateState {
    /// Whether an update run is currently executing.
    #[serde(rename = "updating")]
    pub in_progress: bool,
    /// Approximate cumulative progress, 0..=100. Advisory telemetry only.
    pub progress: u8,
    /// Human-readable description of the current stage.
    pub message: String,
    /// The last run's failure, if any, as a user-facing string.
    #[serde(rename = "error")]
    pub last_error: Option<String>,
}

impl Default for UpdateState {
    fn default() -> Self {
        Self {
            in_progress: false,
            progress: 0,
            message: "ready".to_string(),
            last_error: None,
        }
    }
}

/// Cloneable handle to the process-wide update state.
///
/// Cheap to clone; all clones observe the same state. Pass one to whichever
/// component serves status reads; no global singleton is involved.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<UpdateState>>,
}

impl StatusHandle {
    /// Create a handle in the idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current state.
    pub fn get(&self) -> UpdateState {
        self.inner.read().expect("status lock poisoned").clone()
    }

    /// Claim the single-flight guard and reset the state for a new run.
    ///
    /// This is a synchronous compare-and-set: if a run is already in
    /// progress the call fails with [`UpdateError::AlreadyInProgress`] and
    /// no state changes. On success the state reads
    /// `{in_progress: true, progress: 0, last_error: None}`.
    pub fn begin(&self) -> Result<(), UpdateError> {
        let mut state = self.inner.write().expect("status lock poisoned");
        if state.in_progress {
            return Err(UpdateError::AlreadyInProgress);
        }
        *state = UpdateState {
            in_progress: true,
            progress: 0,
            message: "starting update".to_string(),
            last_error: None,
        };
        Ok(())
    }

    /// Record a stage transition: cumulative progress plus a message.
    ///
    /// Overwrites the previous message on every call.
    pub fn transition(&self, progress: u8, message: impl Into<String>) {
        let mut state = self.inner.write().expect("status lock poisoned");
        state.progress = progress.min(100);
        state.message = message.into();
    }

    /// Update progress only, without touching the message.
    ///
    /// Used by the fetcher for byte-level progress inside its band. Never
    /// moves progress backwards.
    pub fn set_progress(&self, progress: u8) {
        let mut state = self.inner.write().expect("status lock poisoned");
        state.progress = state.progress.max(progress.min(100));
    }

    /// Release the single-flight guard at the end of a run.
    ///
    /// This is the run finalizer's sole responsibility and the only place
    /// the `in_progress` flag is cleared. On failure the error is recorded
    /// in both `last_error` and the message.
    pub fn finish(&self, error: Option<String>) {
        let mut state = self.inner.write().expect("status lock poisoned");
        state.in_progress = false;
        if let Some(err) = error {
            state.message = format!("update failed: {err}");
            state.last_error = Some(err);
        }
    }
}
