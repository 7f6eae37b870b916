//! The update state machine.
//!
//! [`UpdateOrchestrator`] sequences one complete update attempt:
//!
//! ```text
//! Idle → Resolving → Downloading → Backing Up → Extracting → Stopping
//!      → Replacing → Starting → Reloading → HealthChecking
//!      → {Committed | RollingBack} → Idle
//! ```
//!
//! # Failure semantics
//!
//! Everything up to and including extraction runs before the backend is
//! touched; an error there aborts the run with the previous deployment
//! fully intact and no rollback needed. From the Stopping stage onward the
//! run is destructive, and every error triggers a rollback: the new process
//! is brought down (graceful terminate, force-kill escalation), the backup
//! unit created earlier in the same run is restored, the old backend is
//! restarted best-effort with output discarded and no health gate, and the
//! proxy is reloaded. A rollback failure is surfaced in the final error and
//! logged, but never takes down the updater process.
//!
//! # Single-flight and the finalizer
//!
//! [`trigger`](UpdateOrchestrator::trigger) claims the single-flight guard
//! synchronously before spawning the background run; a second trigger while
//! a run is in flight is rejected with no state change. The spawned run is
//! wrapped with `catch_unwind`, and the status finalizer (the only code
//! allowed to clear the in-progress flag) executes on every exit path:
//! success, every handled failure, and panic.
//!
//! # Progress
//!
//! Each stage writes an approximate cumulative percentage and a message to
//! the shared status (resolve/download 0–40, backup 40–50, extract 50–60,
//! stop 60–65, replace 65–75, start 75–80, reload 80–85, health 85–100).
//! This is advisory telemetry and never drives control decisions.
//!
//! # Cancellation
//!
//! There is none: once started, a run cannot be aborted by an external
//! caller. [`trigger`](UpdateOrchestrator::trigger) hands back the run's
//! `JoinHandle` as the seam where a cancellation token would be threaded in
//! later.

use anyhow::{Context, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::archive::Archiver;
use crate::backup::{BackupManager, BackupUnit};
use crate::config::ServiceConfig;
use crate::core::UpdateError;
use crate::download::Fetcher;
use crate::health::{HealthGate, HealthVerdict};
use crate::process::{LogSink, ProcessHandle, Supervisor};
use crate::proxy::ProxyController;
use crate::release::{AssetRef, ReleaseInfo, ReleaseSource};
use crate::status::StatusHandle;
use crate::verify::ChecksumVerifier;

/// Release asset names that carry checksums for the other assets.
const CHECKSUM_MANIFESTS: [&str; 2] = ["checksums.txt", "SHA256SUMS"];

/// Drives one update attempt end to end.
///
/// All external effects go through injected collaborators, so the state
/// machine itself is testable without a network, a process table, or a
/// proxy.
pub struct UpdateOrchestrator {
    config: Arc<ServiceConfig>,
    status: StatusHandle,
    releases: Arc<dyn ReleaseSource>,
    fetcher: Arc<dyn Fetcher>,
    backups: Arc<BackupManager>,
    supervisor: Arc<dyn Supervisor>,
    proxy: Arc<dyn ProxyController>,
    archiver: Arc<dyn Archiver>,
    health: HealthGate,
    client: reqwest::Client,
    rollback_pause: Duration,
}

impl UpdateOrchestrator {
    /// Wire up an orchestrator from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ServiceConfig>,
        status: StatusHandle,
        releases: Arc<dyn ReleaseSource>,
        fetcher: Arc<dyn Fetcher>,
        backups: Arc<BackupManager>,
        supervisor: Arc<dyn Supervisor>,
        proxy: Arc<dyn ProxyController>,
        archiver: Arc<dyn Archiver>,
        health: HealthGate,
    ) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            config,
            status,
            releases,
            fetcher,
            backups,
            supervisor,
            proxy,
            archiver,
            health,
            client,
            rollback_pause: Duration::from_secs(2),
        }
    }

    /// Override the pause between restore and restart-of-old. Tests
    /// compress time with this.
    pub fn with_rollback_pause(mut self, pause: Duration) -> Self {
        self.rollback_pause = pause;
        self
    }

    /// The shared status handle this orchestrator writes to.
    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Start one update run in the background.
    ///
    /// Claims the single-flight guard synchronously: if a run is already in
    /// flight the call fails with [`UpdateError::AlreadyInProgress`] and
    /// nothing is spawned. On success the run executes as a detached tokio
    /// task; the returned `JoinHandle` is informational (and the hook where
    /// cancellation would attach); the caller is not expected to block on
    /// it.
    pub fn trigger(self: Arc<Self>) -> Result<JoinHandle<()>, UpdateError> {
        self.status.begin()?;
        Ok(tokio::spawn(async move { self.run_guarded().await }))
    }

    /// Execute the run with the finalizer guarantee.
    ///
    /// The inner run is wrapped with `catch_unwind` so even a panic flows
    /// into the one place that clears the in-progress flag.
    async fn run_guarded(self: Arc<Self>) {
        let outcome = AssertUnwindSafe(self.run()).catch_unwind().await;

        let error = match outcome {
            Ok(Ok(tag)) => {
                info!("Update to {tag} committed");
                None
            }
            Ok(Err(e)) => {
                error!("Update failed: {e}");
                Some(e.to_string())
            }
            Err(payload) => {
                let msg = panic_message(&payload);
                error!("Update run panicked: {msg}");
                Some(format!("internal error: {msg}"))
            }
        };

        self.status.finish(error);
    }

    /// One full update attempt. Returns the committed tag.
    async fn run(&self) -> Result<String, UpdateError> {
        // Resolving
        self.status.transition(5, "resolving release metadata");
        let release = self
            .releases
            .resolve_latest(self.config.allow_prerelease)
            .await
            .map_err(UpdateError::resolution)?;
        let tag = release.tag.clone();
        let asset = release
            .update_asset(&self.config.asset_suffix)
            .ok_or_else(|| UpdateError::Resolution {
                reason: format!(
                    "release {tag} has no asset matching '{}'",
                    self.config.asset_suffix
                ),
            })?
            .clone();
        info!("Updating to {tag} (bundle {})", asset.name);

        // Downloading
        self.status.transition(10, format!("downloading update bundle {tag}"));
        let download_path = self.config.updates_dir().join(&asset.name);
        self.fetcher
            .fetch(&asset.download_url, &download_path, &self.status, (10, 40))
            .await
            .map_err(UpdateError::download)?;
        self.verify_download(&release, &asset, &download_path)
            .await
            .map_err(UpdateError::download)?;

        // Backing Up
        self.status.transition(40, "backing up current deployment");
        let unit = self.backups.snapshot().await.map_err(UpdateError::backup)?;

        // Extracting
        self.status.transition(50, "extracting update bundle");
        let extract_dir = self.config.extract_dir();
        self.extract_bundle(&download_path, &extract_dir)
            .await
            .map_err(UpdateError::packaging)?;

        // Stopping onward is destructive; errors from here trigger rollback.
        match self.apply(&extract_dir).await {
            Ok(()) => {
                self.status.transition(100, format!("update successful: {tag}"));
                self.cleanup_staging(&download_path, &extract_dir).await;
                if let Err(e) = self.backups.prune(self.config.backup_retention).await {
                    warn!("Backup pruning failed: {e:#}");
                }
                Ok(tag)
            }
            Err((cause, handle)) => {
                self.status.transition(90, "update failed, rolling back");
                match self.rollback(&unit, handle).await {
                    Ok(()) => Err(cause),
                    Err(rollback_err) => Err(UpdateError::Rollback {
                        reason: format!("{cause}; rollback: {rollback_err:#}"),
                    }),
                }
            }
        }
    }

    /// Verify the downloaded bundle when the release publishes checksums.
    ///
    /// Looks for a conventional checksums asset; absence means verification
    /// is skipped, a mismatch aborts the run before anything is touched.
    async fn verify_download(
        &self,
        release: &ReleaseInfo,
        asset: &AssetRef,
        download_path: &Path,
    ) -> Result<()> {
        let manifest = release.assets.iter().find(|a| {
            CHECKSUM_MANIFESTS.contains(&a.name.as_str())
                || a.name == format!("{}.sha256", asset.name)
        });

        match manifest {
            Some(manifest) => {
                ChecksumVerifier::verify_from_manifest_url(
                    &self.client,
                    download_path,
                    &asset.name,
                    &manifest.download_url,
                )
                .await?;
                Ok(())
            }
            None => {
                debug!("Release {} publishes no checksums; skipping verification", release.tag);
                Ok(())
            }
        }
    }

    /// Unpack the bundle into a clean extraction directory.
    async fn extract_bundle(&self, archive: &Path, extract_dir: &Path) -> Result<()> {
        let dir = extract_dir.to_path_buf();
        tokio::task::spawn_blocking(move || crate::utils::fs::remove_dir_all(&dir))
            .await
            .context("extract cleanup task panicked")??;
        self.archiver.extract(archive, extract_dir).await
    }

    /// The destructive stages: stop, replace, start, reload, health-check.
    ///
    /// On failure, returns the error together with the new process handle
    /// when one exists, so rollback can bring the instance down.
    async fn apply(
        &self,
        extract_dir: &Path,
    ) -> Result<(), (UpdateError, Option<Box<dyn ProcessHandle>>)> {
        // Stopping
        self.status.transition(60, "stopping backend");
        if let Err(e) = self.supervisor.stop_all().await {
            return Err((UpdateError::process(e), None));
        }

        // Replacing
        self.status.transition(65, "installing new files");
        if let Err(e) = self.replace_files(extract_dir).await {
            return Err((e, None));
        }

        // Starting
        self.status.transition(75, "starting new backend");
        let mut handle = match self
            .supervisor
            .start(&self.config.backend_artifact(), LogSink::File(self.config.backend_log()))
            .await
        {
            Ok(handle) => handle,
            Err(e) => return Err((UpdateError::process(e), None)),
        };

        // Reloading
        self.status.transition(80, "reloading proxy");
        if let Err(e) = self.proxy.reload().await {
            return Err((UpdateError::process(e), Some(handle)));
        }

        // HealthChecking
        self.status.transition(85, "waiting for backend health");
        match self.health.await_healthy(handle.as_mut()).await {
            HealthVerdict::Healthy => Ok(()),
            HealthVerdict::ProcessExited { code, log_tail } => {
                if !log_tail.is_empty() {
                    error!("Backend log tail:\n{log_tail}");
                }
                let reason = match code {
                    Some(code) => format!("new backend exited with code {code} during health wait"),
                    None => "new backend exited during health wait".to_string(),
                };
                Err((UpdateError::Process { reason }, Some(handle)))
            }
            HealthVerdict::Timeout { log_tail } => {
                if !log_tail.is_empty() {
                    error!("Backend log tail:\n{log_tail}");
                }
                Err((
                    UpdateError::HealthTimeout { waited_secs: self.health.budget_secs() },
                    Some(handle),
                ))
            }
        }
    }

    /// Install the extracted bundle over the deployment.
    ///
    /// The backend artifact is required; the frontend tree and version
    /// record are installed only when the bundle carries them.
    async fn replace_files(&self, extract_dir: &Path) -> Result<(), UpdateError> {
        let new_artifact = extract_dir.join("backend").join(&self.config.artifact_name);
        if !new_artifact.exists() {
            return Err(UpdateError::Packaging {
                reason: format!("bundle is missing backend/{}", self.config.artifact_name),
            });
        }
        tokio::fs::copy(&new_artifact, self.config.backend_artifact())
            .await
            .context("Failed to install backend artifact")
            .map_err(UpdateError::process)?;
        info!("Backend artifact installed");

        let new_frontend = extract_dir.join("frontend");
        if new_frontend.exists() {
            let frontend_dir = self.config.frontend_dir.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                crate::utils::fs::remove_dir_all(&frontend_dir)?;
                crate::utils::fs::copy_dir(&new_frontend, &frontend_dir)
            })
            .await
            .context("frontend install task panicked")
            .map_err(UpdateError::process)?
            .map_err(UpdateError::process)?;
            info!("Frontend tree installed");
        }

        let new_version = extract_dir.join("version.json");
        if new_version.exists() {
            tokio::fs::copy(&new_version, self.config.version_file())
                .await
                .context("Failed to install version record")
                .map_err(UpdateError::process)?;
            info!("Version record installed");
        }

        Ok(())
    }

    /// Undo a failed destructive phase.
    ///
    /// Brings the new process down (terminate, then force-kill), restores
    /// the run's backup unit, pauses briefly, restarts the old backend
    /// best-effort with output discarded, and reloads the proxy. Restore
    /// and restart failures propagate as rollback errors; a proxy reload
    /// failure after an otherwise clean rollback is only logged.
    async fn rollback(
        &self,
        unit: &BackupUnit,
        handle: Option<Box<dyn ProcessHandle>>,
    ) -> Result<()> {
        warn!("Rolling back to backup {}", unit.name());

        if let Some(mut handle) = handle {
            if handle.is_alive() {
                if let Err(e) = handle.terminate().await {
                    warn!("Graceful terminate failed ({e:#}); force-killing");
                    if let Err(e) = handle.force_kill().await {
                        warn!("Force kill failed: {e:#}");
                    }
                }
            }
        }

        self.backups.restore(unit).await.context("restore failed")?;

        tokio::time::sleep(self.rollback_pause).await;

        self.supervisor
            .start(&self.config.backend_artifact(), LogSink::Discard)
            .await
            .context("restart of previous backend failed")?;

        if let Err(e) = self.proxy.reload().await {
            warn!("Proxy reload after rollback failed: {e:#}");
        }

        info!("Rollback complete");
        Ok(())
    }

    /// Remove the downloaded archive and extraction directory after a
    /// successful commit. Failures are logged, never fatal.
    async fn cleanup_staging(&self, download_path: &Path, extract_dir: &Path) {
        if let Err(e) = crate::utils::fs::remove_file(download_path) {
            warn!("Failed to remove downloaded bundle: {e:#}");
        }
        let dir: PathBuf = extract_dir.to_path_buf();
        let result =
            tokio::task::spawn_blocking(move || crate::utils::fs::remove_dir_all(&dir)).await;
        match result {
            Ok(Err(e)) => warn!("Failed to remove extraction directory: {e:#}"),
            Err(e) => warn!("Cleanup task panicked: {e}"),
            Ok(Ok(())) => {}
        }
    }
}

/// Best-effort extraction of a panic payload's message.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
