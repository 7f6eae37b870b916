//! upkeeper service entry point.
//!
//! Parses configuration, wires the production collaborators into the
//! orchestrator, and serves the HTTP surface. The operation log is written
//! both to stdout and to a file so the log endpoint can serve a bounded
//! tail of it.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use upkeeper::api::auth::BackendAuthGate;
use upkeeper::api::{self, AppState};
use upkeeper::archive::TarGzArchiver;
use upkeeper::backup::BackupManager;
use upkeeper::config::ServiceConfig;
use upkeeper::download::ArtifactFetcher;
use upkeeper::health::HealthGate;
use upkeeper::orchestrator::UpdateOrchestrator;
use upkeeper::process::ProcessSupervisor;
use upkeeper::proxy::CommandProxy;
use upkeeper::release::ReleaseResolver;
use upkeeper::status::StatusHandle;
use upkeeper::version_store::VersionStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(ServiceConfig::parse());

    upkeeper::utils::fs::ensure_dir(&config.log_dir)?;
    upkeeper::utils::fs::ensure_dir(&config.updates_dir())?;
    upkeeper::utils::fs::ensure_dir(&config.backups_dir())?;

    // Log to stdout and to the operation log file; the file feeds the /logs
    // endpoint and failure diagnostics.
    let file_appender = tracing_appender::rolling::never(&config.log_dir, "upkeeper.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let status = StatusHandle::new();
    let store = VersionStore::new(config.version_file());

    info!("upkeeper starting");
    info!("Release repository: {}", config.github_repo);
    info!("Pre-releases allowed: {}", config.allow_prerelease);
    info!("Current version: {}", store.current_version());

    let archiver = Arc::new(TarGzArchiver);
    let releases = Arc::new(ReleaseResolver::new(config.github_repo.clone()));
    let backups = Arc::new(BackupManager::new(
        config.backups_dir(),
        config.backend_artifact(),
        config.frontend_dir.clone(),
        config.version_file(),
        archiver.clone(),
    ));
    let supervisor = Arc::new(ProcessSupervisor::new(
        config.launch_argv(),
        config.kill_pattern.clone(),
        Duration::from_secs(config.stop_grace_secs),
    ));
    let proxy = Arc::new(CommandProxy::new(config.proxy_argv()));
    let health = HealthGate::new(config.health_url(), config.health_budget_secs);

    let orchestrator = Arc::new(UpdateOrchestrator::new(
        config.clone(),
        status.clone(),
        releases.clone(),
        Arc::new(ArtifactFetcher::default()),
        backups,
        supervisor,
        proxy,
        archiver,
        health,
    ));

    let state = AppState {
        config: config.clone(),
        status,
        store,
        releases,
        orchestrator,
        auth: Arc::new(BackendAuthGate::new(config.auth_url())),
        operation_log: config.operation_log(),
    };

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Listening on {}", config.listen);

    axum::serve(listener, api::router(state)).await.context("server error")
}
