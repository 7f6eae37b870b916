//! Authorization gate.
//!
//! Update triggers and log reads require an admin allow. The updater does
//! not own credentials; it forwards the caller's `Authorization` header to
//! the managed backend's verification endpoint and treats the answer as a
//! plain yes/no. Any failure to verify (missing header, non-200 answer,
//! backend unreachable) is a deny.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Yes/no authorization check for privileged endpoints.
#[async_trait]
pub trait AuthGate: Send + Sync {
    /// Decide whether the given `Authorization` header value is allowed.
    async fn verify(&self, authorization: Option<&str>) -> bool;
}

/// [`AuthGate`] delegating to the managed backend's verify endpoint.
pub struct BackendAuthGate {
    client: reqwest::Client,
    verify_url: String,
}

impl BackendAuthGate {
    /// Create a gate verifying against `verify_url`.
    pub fn new(verify_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .expect("failed to build HTTP client");
        Self { client, verify_url: verify_url.into() }
    }
}

#[async_trait]
impl AuthGate for BackendAuthGate {
    async fn verify(&self, authorization: Option<&str>) -> bool {
        let Some(authorization) = authorization else {
            return false;
        };

        match self
            .client
            .get(&self.verify_url)
            .header("Authorization", authorization)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Authorization verification failed: {e}");
                false
            }
        }
    }
}
