//! Request handlers.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{error, instrument, warn};

use crate::core::UpdateError;
use crate::release::compare;
use crate::utils;

use super::AppState;

/// Lines of operation log returned by the log endpoint.
const LOG_TAIL_LINES: usize = 1000;

/// The `{code, data, message}` envelope every endpoint answers with.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub data: Option<T>,
    pub message: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self { code: 0, data: Some(data), message: "success".to_string() })
    }

    fn err(status: StatusCode, message: impl Into<String>) -> Response {
        let body = Json(Self { code: status.as_u16(), data: None, message: message.into() });
        (status, body).into_response()
    }
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok())
}

/// Liveness of the updater itself.
pub async fn health() -> Response {
    ApiResponse::ok("ok").into_response()
}

/// The current version record.
pub async fn version(State(state): State<AppState>) -> Response {
    ApiResponse::ok(state.store.load()).into_response()
}

/// Payload of a successful update check.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub has_update: bool,
    pub current_version: String,
    pub latest_version: String,
    pub latest_tag: String,
    pub release_notes: String,
    pub published_at: String,
    pub prerelease: bool,
}

/// Compare the deployed version against the latest eligible release.
#[instrument(skip(state))]
pub async fn check(State(state): State<AppState>) -> Response {
    let current_version = state.store.current_version();

    let release = match state.releases.resolve_latest(state.config.allow_prerelease).await {
        Ok(release) => release,
        Err(e) => {
            error!("Update check failed: {e:#}");
            return ApiResponse::<CheckResult>::err(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to resolve release metadata",
            );
        }
    };

    let latest_version = release.version().to_string();
    let has_update = compare(&latest_version, &current_version) == Ordering::Greater;

    ApiResponse::ok(CheckResult {
        has_update,
        current_version,
        latest_version,
        latest_tag: release.tag,
        release_notes: release.body,
        published_at: release.published_at,
        prerelease: release.prerelease,
    })
    .into_response()
}

/// Trigger an update run (admin only).
///
/// Precondition failures (missing authorization, a run already in flight)
/// are answered synchronously; the state machine is never entered for them.
#[instrument(skip(state, headers))]
pub async fn update(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.auth.verify(authorization(&headers)).await {
        return ApiResponse::<String>::err(StatusCode::FORBIDDEN, "admin authorization required");
    }

    match state.orchestrator.clone().trigger() {
        Ok(_join) => ApiResponse::ok("update started").into_response(),
        Err(UpdateError::AlreadyInProgress) => {
            warn!("Update trigger rejected: run already in flight");
            ApiResponse::<String>::err(StatusCode::CONFLICT, "an update is already in progress")
        }
        Err(e) => ApiResponse::<String>::err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Current update run status.
pub async fn status(State(state): State<AppState>) -> Response {
    ApiResponse::ok(state.status.get()).into_response()
}

/// Bounded tail of the operation log (admin only).
#[instrument(skip(state, headers))]
pub async fn logs(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.auth.verify(authorization(&headers)).await {
        return ApiResponse::<String>::err(StatusCode::FORBIDDEN, "admin authorization required");
    }

    match utils::fs::tail_lines(&state.operation_log, LOG_TAIL_LINES) {
        Ok(tail) => ApiResponse::ok(tail).into_response(),
        Err(e) => {
            error!("Failed to read operation log: {e:#}");
            ApiResponse::<String>::err(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
