//! Health gate verdicts against a local listener and fake process handles.

use std::time::Duration;

use axum::http::StatusCode;
use upkeeper::health::{HealthGate, HealthVerdict};
use upkeeper::process::{LogSink, Supervisor};
use upkeeper::test_utils::{FakeProcessSpec, FakeSupervisor, spawn_health_server};

fn fast_gate(endpoint: String, budget: u64) -> HealthGate {
    HealthGate::new(endpoint, budget).with_interval(Duration::from_millis(20))
}

async fn handle_from(spec: FakeProcessSpec, sink: LogSink) -> Box<dyn upkeeper::process::ProcessHandle> {
    FakeSupervisor::with_specs([spec])
        .start(std::path::Path::new("/unused"), sink)
        .await
        .unwrap()
}

#[tokio::test]
async fn healthy_endpoint_passes_immediately() {
    let base = spawn_health_server(StatusCode::OK).await;
    let gate = fast_gate(format!("{base}/api/system/health"), 30);

    let mut handle = handle_from(FakeProcessSpec::running(), LogSink::Discard).await;
    match gate.await_healthy(handle.as_mut()).await {
        HealthVerdict::Healthy => {}
        other => panic!("expected Healthy, got {other:?}"),
    }
}

#[tokio::test]
async fn exited_process_short_circuits_with_log_tail() {
    let tmp = tempfile::TempDir::new().unwrap();
    let log = tmp.path().join("backend.log");

    // Endpoint never listens; the dead process must be noticed well before
    // the budget runs out.
    let gate = fast_gate("http://127.0.0.1:9/api/system/health".to_string(), 60);
    let mut handle = handle_from(
        FakeProcessSpec::exiting(1, "FATAL: port already in use"),
        LogSink::File(log),
    )
    .await;

    match gate.await_healthy(handle.as_mut()).await {
        HealthVerdict::ProcessExited { code, log_tail } => {
            assert_eq!(code, Some(1));
            assert!(log_tail.contains("port already in use"));
        }
        other => panic!("expected ProcessExited, got {other:?}"),
    }
}

#[tokio::test]
async fn unhealthy_status_waits_out_the_budget() {
    // Listening but answering 503: not a pass, not a process failure.
    let base = spawn_health_server(StatusCode::SERVICE_UNAVAILABLE).await;
    let gate = fast_gate(format!("{base}/api/system/health"), 3);

    let mut handle = handle_from(FakeProcessSpec::running(), LogSink::Discard).await;
    match gate.await_healthy(handle.as_mut()).await {
        HealthVerdict::Timeout { .. } => {}
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_refused_waits_out_the_budget() {
    let gate = fast_gate("http://127.0.0.1:9/api/system/health".to_string(), 3);

    let mut handle = handle_from(FakeProcessSpec::running(), LogSink::Discard).await;
    match gate.await_healthy(handle.as_mut()).await {
        HealthVerdict::Timeout { .. } => {}
        other => panic!("expected Timeout, got {other:?}"),
    }
}
