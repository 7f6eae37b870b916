//! HTTP surface of the updater.
//!
//! A small axum router exposing the updater's operations: liveness, the
//! current version record, update checks, the authorization-gated update
//! trigger, run status, and a bounded tail of the operation log. Every
//! response uses the `{code, data, message}` envelope the frontend expects.
//!
//! The handlers only read shared state and delegate; the update run itself
//! executes as a background task owned by the orchestrator, so no request
//! ever blocks on it.

pub mod auth;
pub mod handlers;

use axum::{
    Router,
    routing::{get, post},
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::orchestrator::UpdateOrchestrator;
use crate::release::ReleaseSource;
use crate::status::StatusHandle;
use crate::version_store::VersionStore;

use auth::AuthGate;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Arc<ServiceConfig>,
    /// Shared update status (read-only here).
    pub status: StatusHandle,
    /// Version record reader.
    pub store: VersionStore,
    /// Release catalog access for update checks.
    pub releases: Arc<dyn ReleaseSource>,
    /// The state machine driving update runs.
    pub orchestrator: Arc<UpdateOrchestrator>,
    /// Authorization gate for trigger and log access.
    pub auth: Arc<dyn AuthGate>,
    /// Operation log served by the log endpoint.
    pub operation_log: PathBuf,
}

/// Build the updater's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/version", get(handlers::version))
        .route("/check", get(handlers::check))
        .route("/update", post(handlers::update))
        .route("/status", get(handlers::status))
        .route("/logs", get(handlers::logs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
