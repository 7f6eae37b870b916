//! End-to-end update runs: commit, rollback, single-flight, finalizer.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use upkeeper::archive::{Archiver, TarGzArchiver};
use upkeeper::backup::BackupManager;
use upkeeper::core::UpdateError;
use upkeeper::download::Fetcher;
use upkeeper::health::HealthGate;
use upkeeper::orchestrator::UpdateOrchestrator;
use upkeeper::release::ReleaseSource;
use upkeeper::status::StatusHandle;
use upkeeper::test_utils::{
    DeploymentFixture, FakeFetcher, FakeProcessSpec, FakeProxy, FakeReleases, FakeSupervisor,
    spawn_health_server,
};

/// Assemble an orchestrator over the fixture with the given fakes.
///
/// `health_base` points the gate at a live listener; `None` leaves it on
/// the fixture's closed port so every probe sees connection-refused.
fn build(
    fixture: &DeploymentFixture,
    releases: Arc<dyn ReleaseSource>,
    fetcher: Arc<dyn Fetcher>,
    supervisor: Arc<FakeSupervisor>,
    proxy: Arc<FakeProxy>,
    health_base: Option<String>,
) -> Arc<UpdateOrchestrator> {
    let config = fixture.config.clone();
    let archiver = Arc::new(TarGzArchiver);
    let backups = Arc::new(BackupManager::new(
        config.backups_dir(),
        config.backend_artifact(),
        config.frontend_dir.clone(),
        config.version_file(),
        archiver.clone(),
    ));

    let endpoint = match health_base {
        Some(base) => format!("{base}{}", config.health_path),
        None => config.health_url(),
    };
    let health = HealthGate::new(endpoint, config.health_budget_secs)
        .with_interval(Duration::from_millis(20));

    Arc::new(
        UpdateOrchestrator::new(
            config,
            StatusHandle::new(),
            releases,
            fetcher,
            backups,
            supervisor,
            proxy,
            archiver,
            health,
        )
        .with_rollback_pause(Duration::from_millis(10)),
    )
}

async fn run_to_completion(orchestrator: &Arc<UpdateOrchestrator>) {
    let join = orchestrator.clone().trigger().expect("trigger rejected");
    join.await.expect("run task failed");
}

#[tokio::test]
async fn successful_update_commits_and_cleans_up() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");
    let bundle = fixture.build_bundle("1.2.0").await;
    let bundle_name = bundle.file_name().unwrap().to_string_lossy().to_string();

    let supervisor = Arc::new(FakeSupervisor::with_specs([FakeProcessSpec::running()]));
    let proxy = Arc::new(FakeProxy::default());
    let health_base = spawn_health_server(StatusCode::OK).await;

    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::returning(fixture.release_for("v1.2.0", &bundle_name))),
        Arc::new(FakeFetcher::serving(bundle)),
        supervisor.clone(),
        proxy.clone(),
        Some(health_base),
    );

    run_to_completion(&orchestrator).await;

    // Terminal state: success, guard released, no error.
    let state = orchestrator.status().get();
    assert!(!state.in_progress);
    assert_eq!(state.progress, 100);
    assert_eq!(state.last_error, None);
    assert!(state.message.contains("v1.2.0"));

    // New deployment is in place, version record included.
    let deployed = fixture.deployed_state();
    assert_eq!(deployed.artifact.as_deref(), Some(b"backend-1.2.0".as_slice()));
    assert_eq!(deployed.version_record.version, "1.2.0");
    assert_eq!(deployed.version_record.tag, "v1.2.0");
    assert_eq!(
        deployed.index_html.as_deref(),
        Some(b"<html>1.2.0</html>".as_slice())
    );

    // Staging artifacts are gone after commit.
    assert!(!fixture.config.updates_dir().join(&bundle_name).exists());
    assert!(!fixture.config.extract_dir().exists());

    // Old backend stopped once, new one started with logged output, proxy
    // reloaded once.
    assert_eq!(supervisor.stop_count(), 1);
    let starts = supervisor.start_records();
    assert_eq!(starts.len(), 1);
    assert!(!starts[0].discarded_output);
    assert_eq!(starts[0].artifact_bytes.as_deref(), Some(b"backend-1.2.0".as_slice()));
    assert_eq!(proxy.reload_count(), 1);
}

#[tokio::test]
async fn backend_exit_during_health_wait_rolls_back() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");
    let before = fixture.deployed_state();
    let bundle = fixture.build_bundle("1.2.0").await;
    let bundle_name = bundle.file_name().unwrap().to_string_lossy().to_string();

    // The new backend dies with code 1; the rollback restart comes from the
    // default healthy spec.
    let supervisor = Arc::new(FakeSupervisor::with_specs([FakeProcessSpec::exiting(
        1,
        "Caused by: BindException",
    )]));
    let proxy = Arc::new(FakeProxy::default());

    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::returning(fixture.release_for("v1.2.0", &bundle_name))),
        Arc::new(FakeFetcher::serving(bundle)),
        supervisor.clone(),
        proxy.clone(),
        None,
    );

    run_to_completion(&orchestrator).await;

    // Byte-for-byte back to the pre-run deployment.
    assert_eq!(fixture.deployed_state(), before);

    let state = orchestrator.status().get();
    assert!(!state.in_progress);
    let error = state.last_error.expect("run must record an error");
    assert!(error.contains("exited with code 1"), "unexpected error: {error}");

    // First start ran the new artifact with logged output; the rollback
    // restart ran the restored old artifact with output discarded.
    let starts = supervisor.start_records();
    assert_eq!(starts.len(), 2);
    assert!(!starts[0].discarded_output);
    assert_eq!(starts[0].artifact_bytes.as_deref(), Some(b"backend-1.2.0".as_slice()));
    assert!(starts[1].discarded_output);
    assert_eq!(starts[1].artifact_bytes.as_deref(), Some(b"backend-1.0.0".as_slice()));

    // Reloaded once after replacement and once after rollback.
    assert_eq!(proxy.reload_count(), 2);
}

#[tokio::test]
async fn health_timeout_rolls_back() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");
    let before = fixture.deployed_state();
    let bundle = fixture.build_bundle("1.2.0").await;
    let bundle_name = bundle.file_name().unwrap().to_string_lossy().to_string();

    // New backend stays alive but nothing ever listens on the health port.
    let supervisor = Arc::new(FakeSupervisor::with_specs([FakeProcessSpec::running()]));
    let proxy = Arc::new(FakeProxy::default());

    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::returning(fixture.release_for("v1.2.0", &bundle_name))),
        Arc::new(FakeFetcher::serving(bundle)),
        supervisor.clone(),
        proxy.clone(),
        None,
    );

    run_to_completion(&orchestrator).await;

    assert_eq!(fixture.deployed_state(), before);

    let state = orchestrator.status().get();
    let error = state.last_error.expect("run must record an error");
    assert!(error.contains("health check failed"), "unexpected error: {error}");

    let starts = supervisor.start_records();
    assert_eq!(starts.len(), 2);
    assert!(starts[1].discarded_output);
    assert_eq!(starts[1].artifact_bytes.as_deref(), Some(b"backend-1.0.0".as_slice()));
}

#[tokio::test]
async fn resolution_failure_touches_nothing() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");
    let before = fixture.deployed_state();

    let supervisor = Arc::new(FakeSupervisor::default());
    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::failing()),
        Arc::new(FakeFetcher::failing()),
        supervisor.clone(),
        Arc::new(FakeProxy::default()),
        None,
    );

    run_to_completion(&orchestrator).await;

    assert_eq!(fixture.deployed_state(), before);
    assert_eq!(supervisor.stop_count(), 0);
    assert!(supervisor.start_records().is_empty());

    let error = orchestrator.status().get().last_error.unwrap();
    assert!(error.contains("release resolution failed"), "unexpected error: {error}");
}

#[tokio::test]
async fn download_failure_aborts_before_backup() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");

    let supervisor = Arc::new(FakeSupervisor::default());
    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::returning(fixture.release_for("v1.2.0", "app-1.2.0-update.tar.gz"))),
        Arc::new(FakeFetcher::failing()),
        supervisor.clone(),
        Arc::new(FakeProxy::default()),
        None,
    );

    run_to_completion(&orchestrator).await;

    // No backup unit was created and the backend was never stopped.
    assert!(upkeeper::utils::fs::sorted_subdirs(&fixture.config.backups_dir())
        .unwrap()
        .is_empty());
    assert_eq!(supervisor.stop_count(), 0);

    let error = orchestrator.status().get().last_error.unwrap();
    assert!(error.contains("download failed"), "unexpected error: {error}");
}

#[tokio::test]
async fn incomplete_bundle_rolls_back_after_stop() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");
    let before = fixture.deployed_state();

    // A bundle with a frontend but no backend artifact.
    let staging = fixture.root.path().join("broken-staging");
    std::fs::create_dir_all(staging.join("frontend")).unwrap();
    std::fs::write(staging.join("frontend/index.html"), "<html>broken</html>").unwrap();
    let bundle = fixture.root.path().join("app-1.2.0-update.tar.gz");
    TarGzArchiver.create(&staging, &bundle).await.unwrap();
    let bundle_name = bundle.file_name().unwrap().to_string_lossy().to_string();

    let supervisor = Arc::new(FakeSupervisor::default());
    let proxy = Arc::new(FakeProxy::default());
    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::returning(fixture.release_for("v1.2.0", &bundle_name))),
        Arc::new(FakeFetcher::serving(bundle)),
        supervisor.clone(),
        proxy.clone(),
        None,
    );

    run_to_completion(&orchestrator).await;

    // The backend had already been stopped, so the failure rolled back and
    // restarted the old artifact.
    assert_eq!(fixture.deployed_state(), before);
    assert_eq!(supervisor.stop_count(), 1);
    let starts = supervisor.start_records();
    assert_eq!(starts.len(), 1);
    assert!(starts[0].discarded_output);

    let error = orchestrator.status().get().last_error.unwrap();
    assert!(error.contains("update bundle incomplete"), "unexpected error: {error}");
}

#[tokio::test]
async fn second_trigger_is_rejected_while_running() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");

    let supervisor = Arc::new(FakeSupervisor::default());
    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::failing().with_delay(Duration::from_millis(300))),
        Arc::new(FakeFetcher::failing()),
        supervisor.clone(),
        Arc::new(FakeProxy::default()),
        None,
    );

    let join = orchestrator.clone().trigger().expect("first trigger must be accepted");

    // Rejected synchronously, with the running state untouched.
    match orchestrator.clone().trigger() {
        Err(UpdateError::AlreadyInProgress) => {}
        other => panic!("expected AlreadyInProgress, got {other:?}"),
    }
    assert!(orchestrator.status().get().in_progress);

    join.await.unwrap();

    // Exactly one run executed, and it released the guard.
    assert_eq!(supervisor.stop_count(), 0);
    assert!(!orchestrator.status().get().in_progress);

    // A new trigger is accepted again after completion.
    let join = orchestrator.clone().trigger().expect("trigger must be accepted after completion");
    join.await.unwrap();
}

#[tokio::test]
async fn failed_rollback_is_surfaced_not_fatal() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");
    let bundle = fixture.build_bundle("1.2.0").await;
    let bundle_name = bundle.file_name().unwrap().to_string_lossy().to_string();

    // Every start fails: the new backend cannot launch, and neither can the
    // restored old one; a rollback that does not complete cleanly.
    let supervisor = Arc::new(FakeSupervisor::failing_start());
    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::returning(fixture.release_for("v1.2.0", &bundle_name))),
        Arc::new(FakeFetcher::serving(bundle)),
        supervisor.clone(),
        Arc::new(FakeProxy::default()),
        None,
    );

    run_to_completion(&orchestrator).await;

    // The updater survives; the degraded state is surfaced, not hidden.
    let state = orchestrator.status().get();
    assert!(!state.in_progress);
    let error = state.last_error.expect("run must record an error");
    assert!(error.contains("rollback"), "unexpected error: {error}");
    assert!(error.contains("restart of previous backend failed"), "unexpected error: {error}");

    // Files were still restored even though the restart failed.
    assert_eq!(
        std::fs::read(fixture.config.backend_artifact()).unwrap(),
        b"backend-1.0.0"
    );
}

#[tokio::test]
async fn finalizer_releases_guard_on_panic() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");

    let orchestrator = build(
        &fixture,
        Arc::new(FakeReleases::panicking("catalog client bug")),
        Arc::new(FakeFetcher::failing()),
        Arc::new(FakeSupervisor::default()),
        Arc::new(FakeProxy::default()),
        None,
    );

    run_to_completion(&orchestrator).await;

    let state = orchestrator.status().get();
    assert!(!state.in_progress, "panic must not leave the guard stuck");
    let error = state.last_error.expect("panic must surface as an error");
    assert!(error.contains("internal error"), "unexpected error: {error}");
    assert!(error.contains("catalog client bug"), "unexpected error: {error}");
}
