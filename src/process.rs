//! Backend process supervision.
//!
//! The supervisor owns the two process-level operations the update run
//! needs: stopping whatever backend instances are currently running, and
//! launching a new instance detached from the updater's own lifetime.
//! Liveness and termination of a launched instance go through the
//! [`ProcessHandle`] capability so the orchestrator and health gate are
//! testable against a fake handle without spawning anything.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Where a launched process's combined output goes.
#[derive(Debug, Clone)]
pub enum LogSink {
    /// Append stdout+stderr to a log file the handle owns for the run.
    File(PathBuf),
    /// Discard all output; used for the best-effort rollback restart.
    Discard,
}

/// Capability view of a launched backend instance.
///
/// Valid only for the duration of one update run. `is_alive` and
/// `exit_code` are non-blocking; `terminate` is graceful with a bounded
/// wait and `force_kill` is the escalation when it doesn't land.
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process id of the instance.
    fn pid(&self) -> u32;

    /// Non-blocking liveness check.
    fn is_alive(&mut self) -> bool;

    /// Exit code, once the process has exited. `None` while running or when
    /// the platform reports no code (killed by signal).
    fn exit_code(&mut self) -> Option<i32>;

    /// Path of the process log this handle owns, when output went to a file.
    fn log_path(&self) -> Option<&Path>;

    /// Ask the process to terminate and wait a bounded time for it to go.
    ///
    /// Errors when the process is still alive after the wait; callers
    /// escalate to [`force_kill`](Self::force_kill).
    async fn terminate(&mut self) -> Result<()>;

    /// Kill the process outright.
    async fn force_kill(&mut self) -> Result<()>;
}

/// Launches and stops backend instances.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Signal every instance matching the recognition pattern and wait the
    /// grace period. Not an error if nothing was running.
    async fn stop_all(&self) -> Result<()>;

    /// Launch a new backend instance running `artifact`, detached, with
    /// combined output routed to `sink`.
    async fn start(&self, artifact: &Path, sink: LogSink) -> Result<Box<dyn ProcessHandle>>;
}

/// Production [`Supervisor`] shelling out the way the deployment expects:
/// `pkill` for stop, the configured launch argv for start.
pub struct ProcessSupervisor {
    /// Launch argv template; the `{artifact}` placeholder is substituted
    /// with the artifact path.
    launch: Vec<String>,
    /// `pkill -f` pattern recognizing backend instances.
    kill_pattern: String,
    /// Wait after signalling instances to stop.
    grace: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor from a launch template and recognition pattern.
    pub fn new(launch: Vec<String>, kill_pattern: impl Into<String>, grace: Duration) -> Self {
        Self { launch, kill_pattern: kill_pattern.into(), grace }
    }

    fn launch_argv(&self, artifact: &Path) -> Result<Vec<String>> {
        if self.launch.is_empty() {
            bail!("launch command is empty");
        }
        Ok(self
            .launch
            .iter()
            .map(|arg| arg.replace("{artifact}", &artifact.to_string_lossy()))
            .collect())
    }
}

#[async_trait]
impl Supervisor for ProcessSupervisor {
    async fn stop_all(&self) -> Result<()> {
        info!("Stopping backend instances matching '{}'", self.kill_pattern);

        // pkill exits non-zero when nothing matched; that's not an error here.
        let status = Command::new("pkill")
            .args(["-f", &self.kill_pattern])
            .status()
            .await
            .context("Failed to run pkill")?;
        debug!("pkill exited with {status}");

        tokio::time::sleep(self.grace).await;
        Ok(())
    }

    async fn start(&self, artifact: &Path, sink: LogSink) -> Result<Box<dyn ProcessHandle>> {
        let argv = self.launch_argv(artifact)?;
        info!("Launching backend: {}", argv.join(" "));

        let (stdout, stderr, log_path) = match &sink {
            LogSink::File(path) => {
                if let Some(parent) = path.parent() {
                    crate::utils::fs::ensure_dir(parent)?;
                }
                let file = std::fs::File::create(path)
                    .with_context(|| format!("Failed to create log file {}", path.display()))?;
                let err = file.try_clone().context("Failed to clone log file handle")?;
                (Stdio::from(file), Stdio::from(err), Some(path.clone()))
            }
            LogSink::Discard => (Stdio::null(), Stdio::null(), None),
        };

        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            // The child must survive the updater's own restart.
            .kill_on_drop(false);

        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .with_context(|| format!("Failed to launch backend via '{}'", argv[0]))?;
        let pid = child.id().context("launched backend has no pid")?;
        info!("Backend started (pid {pid})");

        Ok(Box::new(SpawnedBackend { child, pid, exit: None, log_path }))
    }
}

/// [`ProcessHandle`] over a really spawned child.
struct SpawnedBackend {
    child: Child,
    pid: u32,
    exit: Option<i32>,
    log_path: Option<PathBuf>,
}

impl SpawnedBackend {
    /// Poll the child once, caching the exit code on the first observation.
    fn poll(&mut self) -> bool {
        if self.exit.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.exit = status.code();
                false
            }
            Err(e) => {
                warn!("Failed to poll backend pid {}: {e}", self.pid);
                false
            }
        }
    }
}

#[async_trait]
impl ProcessHandle for SpawnedBackend {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        self.poll()
    }

    fn exit_code(&mut self) -> Option<i32> {
        self.poll();
        self.exit
    }

    fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    async fn terminate(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        debug!("Sending SIGTERM to backend pid {}", self.pid);
        Command::new("kill")
            .args(["-TERM", &self.pid.to_string()])
            .status()
            .await
            .context("Failed to run kill")?;

        for _ in 0..50 {
            if !self.is_alive() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        bail!("backend pid {} did not exit within 5s of SIGTERM", self.pid)
    }

    async fn force_kill(&mut self) -> Result<()> {
        warn!("Force-killing backend pid {}", self.pid);
        self.child.kill().await.context("Failed to kill backend process")?;
        self.poll();
        Ok(())
    }
}
