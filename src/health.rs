//! Post-start health verification.
//!
//! After a new backend instance launches, [`HealthGate::await_healthy`]
//! polls its health endpoint on a bounded schedule and decides pass/fail.
//! The gate distinguishes three situations that look identical from the
//! outside but need different handling:
//!
//! - **not yet listening**: connection refused or probe timeout while the
//!   backend is still booting; an expected transient, waited out.
//! - **listening but unhealthy**: a response that isn't 200; also waited
//!   out, the endpoint may come good.
//! - **process exited**: the instance died while we were waiting; there is
//!   no point exhausting the budget, so the wait short-circuits with the
//!   exit code and a bounded tail of the process log.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::process::ProcessHandle;
use crate::utils;

/// Lines of process log quoted in failure verdicts.
const LOG_TAIL_LINES: usize = 100;

/// Outcome of one health wait.
#[derive(Debug)]
pub enum HealthVerdict {
    /// The endpoint answered 200 within budget.
    Healthy,
    /// The backend process exited during the wait.
    ProcessExited {
        /// Exit code when the platform reported one.
        code: Option<i32>,
        /// Bounded tail of the process log for diagnostics.
        log_tail: String,
    },
    /// The budget elapsed without a 200.
    Timeout {
        /// Bounded tail of the process log for diagnostics.
        log_tail: String,
    },
}

/// Bounded poller for a backend health endpoint.
pub struct HealthGate {
    client: reqwest::Client,
    endpoint: String,
    max_iterations: u64,
    interval: Duration,
    alive_check_every: u64,
}

impl HealthGate {
    /// Create a gate polling `endpoint` once per second for up to
    /// `max_seconds` iterations.
    pub fn new(endpoint: impl Into<String>, max_seconds: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            endpoint: endpoint.into(),
            max_iterations: max_seconds,
            interval: Duration::from_secs(1),
            alive_check_every: 5,
        }
    }

    /// Override the polling interval. Tests compress time with this; the
    /// iteration budget and the liveness cadence keep their meaning.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Seconds the full budget represents, for error reporting.
    pub fn budget_secs(&self) -> u64 {
        self.max_iterations
    }

    fn log_tail(handle: &dyn ProcessHandle) -> String {
        handle
            .log_path()
            .and_then(|path| utils::fs::tail_lines(path, LOG_TAIL_LINES).ok())
            .unwrap_or_default()
    }

    /// Poll until the endpoint passes, the process dies, or the budget runs
    /// out.
    ///
    /// Blocks only the calling task; concurrent status reads are untouched.
    pub async fn await_healthy(&self, handle: &mut dyn ProcessHandle) -> HealthVerdict {
        info!("Waiting for backend health at {} (budget {}s)", self.endpoint, self.max_iterations);
        let mut last_alive_check: u64 = 0;

        for i in 0..self.max_iterations {
            // Liveness every few iterations; a dead process short-circuits
            // the whole wait.
            if i.saturating_sub(last_alive_check) >= self.alive_check_every {
                last_alive_check = i;
                if !handle.is_alive() {
                    let code = handle.exit_code();
                    let log_tail = Self::log_tail(handle);
                    error!(
                        "Backend pid {} exited during health wait (after {i} iterations), code {code:?}",
                        handle.pid()
                    );
                    return HealthVerdict::ProcessExited { code, log_tail };
                }
                debug!("Backend pid {} still running", handle.pid());
            }

            match self.client.get(&self.endpoint).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Health check passed after {} iterations", i + 1);
                    return HealthVerdict::Healthy;
                }
                Ok(response) => {
                    // Listening but not ready; reduced-frequency logging to
                    // avoid flooding during slow startups.
                    if i % 10 == 0 {
                        debug!(
                            "Health attempt {}/{}: HTTP {}",
                            i + 1,
                            self.max_iterations,
                            response.status()
                        );
                    }
                }
                Err(e) if e.is_connect() => {
                    if i % 10 == 0 && i > 0 {
                        debug!(
                            "Health attempt {}/{}: connection refused (backend may still be starting)",
                            i + 1,
                            self.max_iterations
                        );
                    }
                }
                Err(e) if e.is_timeout() => {
                    if i % 10 == 0 {
                        debug!("Health attempt {}/{}: request timed out", i + 1, self.max_iterations);
                    }
                }
                Err(e) => {
                    // Unexpected probe failures are noted but never abort the wait.
                    warn!("Health probe error: {e}");
                }
            }

            tokio::time::sleep(self.interval).await;
        }

        let log_tail = Self::log_tail(handle);
        error!("Health check did not pass within {}s", self.max_iterations);
        HealthVerdict::Timeout { log_tail }
    }
}
