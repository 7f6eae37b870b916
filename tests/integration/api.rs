//! HTTP surface behavior through the router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use upkeeper::api::auth::AuthGate;
use upkeeper::api::{AppState, router};
use upkeeper::archive::TarGzArchiver;
use upkeeper::backup::BackupManager;
use upkeeper::download::Fetcher;
use upkeeper::health::HealthGate;
use upkeeper::orchestrator::UpdateOrchestrator;
use upkeeper::release::ReleaseSource;
use upkeeper::status::StatusHandle;
use upkeeper::test_utils::{DeploymentFixture, FakeAuth, FakeFetcher, FakeProxy, FakeReleases, FakeSupervisor};
use upkeeper::version_store::VersionStore;

/// Router over the fixture with the given release source and auth gate.
fn app(
    fixture: &DeploymentFixture,
    releases: Arc<dyn ReleaseSource>,
    auth: Arc<dyn AuthGate>,
) -> (Router, StatusHandle) {
    let config = fixture.config.clone();
    let status = StatusHandle::new();
    let archiver = Arc::new(TarGzArchiver);
    let backups = Arc::new(BackupManager::new(
        config.backups_dir(),
        config.backend_artifact(),
        config.frontend_dir.clone(),
        config.version_file(),
        archiver.clone(),
    ));
    let fetcher: Arc<dyn Fetcher> = Arc::new(FakeFetcher::failing());
    let health = HealthGate::new(config.health_url(), config.health_budget_secs)
        .with_interval(Duration::from_millis(20));

    let orchestrator = Arc::new(
        UpdateOrchestrator::new(
            config.clone(),
            status.clone(),
            releases.clone(),
            fetcher,
            backups,
            Arc::new(FakeSupervisor::default()),
            Arc::new(FakeProxy::default()),
            archiver,
            health,
        )
        .with_rollback_pause(Duration::from_millis(10)),
    );

    let state = AppState {
        config: config.clone(),
        status: status.clone(),
        store: VersionStore::new(config.version_file()),
        releases,
        orchestrator,
        auth,
        operation_log: config.operation_log(),
    };

    (router(state), status)
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    request_json(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn request_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn health_answers_ok() {
    let fixture = DeploymentFixture::new();
    let (router, _) = app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::denying()));

    let (status, body) = get_json(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"], "ok");
}

#[tokio::test]
async fn version_degrades_to_unknown_without_a_record() {
    let fixture = DeploymentFixture::new();
    let (router, _) = app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::denying()));

    let (status, body) = get_json(&router, "/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], "unknown");
    assert_eq!(body["data"]["tag"], "unknown");
    assert_eq!(body["data"]["buildTime"], "");
}

#[tokio::test]
async fn check_reports_update_for_fresh_deployment() {
    // Scenario: no version record yet, catalog publishes v1.2.0.
    let fixture = DeploymentFixture::new();
    let release = fixture.release_for("v1.2.0", "app-1.2.0-update.tar.gz");
    let (router, _) =
        app(&fixture, Arc::new(FakeReleases::returning(release)), Arc::new(FakeAuth::denying()));

    let (status, body) = get_json(&router, "/check").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["data"]["hasUpdate"], true);
    assert_eq!(body["data"]["currentVersion"], "unknown");
    assert_eq!(body["data"]["latestVersion"], "1.2.0");
    assert_eq!(body["data"]["latestTag"], "v1.2.0");
    assert_eq!(body["data"]["prerelease"], false);
}

#[tokio::test]
async fn check_sees_no_update_when_current() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.2.0");
    let release = fixture.release_for("v1.2.0", "app-1.2.0-update.tar.gz");
    let (router, _) =
        app(&fixture, Arc::new(FakeReleases::returning(release)), Arc::new(FakeAuth::denying()));

    let (_, body) = get_json(&router, "/check").await;
    assert_eq!(body["data"]["hasUpdate"], false);
    assert_eq!(body["data"]["currentVersion"], "1.2.0");
}

#[tokio::test]
async fn check_fails_when_catalog_unreachable() {
    let fixture = DeploymentFixture::new();
    let (router, _) = app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::denying()));

    let (status, body) = get_json(&router, "/check").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], 500);
    assert_eq!(body["data"], Value::Null);
}

#[tokio::test]
async fn update_requires_authorization() {
    let fixture = DeploymentFixture::new();
    let (router, status_handle) =
        app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::denying()));

    let request = Request::builder().method("POST").uri("/update").body(Body::empty()).unwrap();
    let (status, body) = request_json(&router, request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 403);
    // The precondition failure never enters the state machine.
    assert!(!status_handle.get().in_progress);
}

#[tokio::test]
async fn update_rejects_concurrent_run_with_conflict() {
    let fixture = DeploymentFixture::new();
    let (router, status_handle) =
        app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::allowing()));

    // Claim the guard as a running update would.
    status_handle.begin().unwrap();

    let request = Request::builder().method("POST").uri("/update").body(Body::empty()).unwrap();
    let (status, body) = request_json(&router, request).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 409);
}

#[tokio::test]
async fn update_starts_a_background_run() {
    let fixture = DeploymentFixture::new();
    fixture.seed_current("1.0.0");
    let (router, status_handle) =
        app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::allowing()));

    let request = Request::builder().method("POST").uri("/update").body(Body::empty()).unwrap();
    let (status, body) = request_json(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);

    // The spawned run (resolution fails fast here) must release the guard.
    for _ in 0..100 {
        if !status_handle.get().in_progress {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let state = status_handle.get();
    assert!(!state.in_progress);
    assert!(state.last_error.is_some());
}

#[tokio::test]
async fn status_serves_the_shared_state() {
    let fixture = DeploymentFixture::new();
    let (router, status_handle) =
        app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::denying()));

    status_handle.begin().unwrap();
    status_handle.transition(40, "backing up current deployment");

    let (status, body) = get_json(&router, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["updating"], true);
    assert_eq!(body["data"]["progress"], 40);
    assert_eq!(body["data"]["message"], "backing up current deployment");
    assert_eq!(body["data"]["error"], Value::Null);
}

#[tokio::test]
async fn logs_are_gated_and_bounded() {
    let fixture = DeploymentFixture::new();
    std::fs::create_dir_all(&fixture.config.log_dir).unwrap();
    std::fs::write(fixture.config.operation_log(), "line one\nline two\n").unwrap();

    let (denied, _) =
        app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::denying()));
    let (status, _) = get_json(&denied, "/logs").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (allowed, _) =
        app(&fixture, Arc::new(FakeReleases::failing()), Arc::new(FakeAuth::allowing()));
    let (status, body) = get_json(&allowed, "/logs").await;
    assert_eq!(status, StatusCode::OK);
    let tail = body["data"].as_str().unwrap();
    assert!(tail.contains("line two"));
}
