//! Test fixtures and fake collaborators.
//!
//! Available to the crate's own tests and, behind the `test-utils` feature,
//! to the external test suites. The fakes implement the orchestrator's
//! collaborator traits so the state machine can be driven end to end
//! without a network, a process table, or a proxy; the fixture builds a
//! complete deployment layout in a temp directory.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::archive::{Archiver, TarGzArchiver};
use crate::config::ServiceConfig;
use crate::download::{Fetcher, ProgressBand};
use crate::process::{LogSink, ProcessHandle, Supervisor};
use crate::proxy::ProxyController;
use crate::release::{AssetRef, ReleaseInfo, ReleaseSource};
use crate::status::StatusHandle;
use crate::version_store::{VersionRecord, VersionStore};

/// A complete throwaway deployment layout.
///
/// Creates `app/`, `www/` and `logs/` under a temp root and a
/// [`ServiceConfig`] pointing at them, with timing knobs compressed for
/// tests. The backend URL points at a closed port so health probes see
/// connection-refused until a test spawns a real listener.
pub struct DeploymentFixture {
    /// Owns the temp tree; dropped with the fixture.
    pub root: TempDir,
    /// Config describing the layout.
    pub config: Arc<ServiceConfig>,
}

impl DeploymentFixture {
    /// Build an empty deployment (no artifact, no frontend, no record).
    pub fn new() -> Self {
        let root = TempDir::new().expect("failed to create fixture root");
        let app_dir = root.path().join("app");
        let frontend_dir = root.path().join("www");
        let log_dir = root.path().join("logs");

        let config = Arc::new(ServiceConfig::from_args([
            "--app-dir",
            app_dir.to_str().unwrap(),
            "--frontend-dir",
            frontend_dir.to_str().unwrap(),
            "--log-dir",
            log_dir.to_str().unwrap(),
            "--artifact-name",
            "app.bin",
            "--backend-url",
            "http://127.0.0.1:9",
            "--stop-grace-secs",
            "0",
            "--health-budget-secs",
            "8",
        ]));

        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::create_dir_all(&log_dir).unwrap();

        Self { root, config }
    }

    /// Install a current deployment: artifact bytes, a frontend tree, and a
    /// version record for `version`.
    pub fn seed_current(&self, version: &str) {
        std::fs::write(self.config.backend_artifact(), format!("backend-{version}")).unwrap();

        let frontend = &self.config.frontend_dir;
        std::fs::create_dir_all(frontend.join("assets")).unwrap();
        std::fs::write(frontend.join("index.html"), format!("<html>{version}</html>")).unwrap();
        std::fs::write(frontend.join("assets/app.js"), format!("// {version}")).unwrap();

        VersionStore::new(self.config.version_file())
            .save(&VersionRecord {
                version: version.to_string(),
                tag: format!("v{version}"),
                build_time: "2025-01-01T00:00:00Z".to_string(),
            })
            .unwrap();
    }

    /// Snapshot of the deployed files, for byte-for-byte comparisons.
    pub fn deployed_state(&self) -> DeployedState {
        DeployedState {
            artifact: std::fs::read(self.config.backend_artifact()).ok(),
            index_html: std::fs::read(self.config.frontend_dir.join("index.html")).ok(),
            app_js: std::fs::read(self.config.frontend_dir.join("assets/app.js")).ok(),
            version_record: VersionStore::new(self.config.version_file()).load(),
        }
    }

    /// Build a real update bundle archive for `version` and return its
    /// path. The bundle carries `backend/app.bin`, a `frontend/` tree and a
    /// `version.json` at the fixed relative paths the orchestrator expects.
    pub async fn build_bundle(&self, version: &str) -> PathBuf {
        let staging = self.root.path().join(format!("bundle-staging-{version}"));
        std::fs::create_dir_all(staging.join("backend")).unwrap();
        std::fs::create_dir_all(staging.join("frontend/assets")).unwrap();

        std::fs::write(staging.join("backend/app.bin"), format!("backend-{version}")).unwrap();
        std::fs::write(
            staging.join("frontend/index.html"),
            format!("<html>{version}</html>"),
        )
        .unwrap();
        std::fs::write(staging.join("frontend/assets/app.js"), format!("// {version}")).unwrap();

        VersionStore::new(staging.join("version.json"))
            .save(&VersionRecord {
                version: version.to_string(),
                tag: format!("v{version}"),
                build_time: "2025-06-01T00:00:00Z".to_string(),
            })
            .unwrap();

        let bundle = self.root.path().join(format!("app-{version}-update.tar.gz"));
        TarGzArchiver.create(&staging, &bundle).await.unwrap();
        bundle
    }

    /// Release metadata advertising `bundle_name` as the update asset.
    pub fn release_for(&self, tag: &str, bundle_name: &str) -> ReleaseInfo {
        ReleaseInfo {
            tag: tag.to_string(),
            name: tag.to_string(),
            body: "release notes".to_string(),
            published_at: "2025-06-01T00:00:00Z".to_string(),
            prerelease: false,
            assets: vec![AssetRef {
                name: bundle_name.to_string(),
                download_url: format!("http://release.invalid/{bundle_name}"),
            }],
        }
    }
}

impl Default for DeploymentFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte-level view of the deployed files.
#[derive(Debug, PartialEq)]
pub struct DeployedState {
    pub artifact: Option<Vec<u8>>,
    pub index_html: Option<Vec<u8>>,
    pub app_js: Option<Vec<u8>>,
    pub version_record: VersionRecord,
}

/// Scripted [`ReleaseSource`].
#[derive(Default)]
pub struct FakeReleases {
    release: Option<ReleaseInfo>,
    delay: Option<Duration>,
    panic_message: Option<String>,
}

impl FakeReleases {
    /// Always resolve to `release`.
    pub fn returning(release: ReleaseInfo) -> Self {
        Self { release: Some(release), ..Self::default() }
    }

    /// Always fail, as an unreachable catalog would.
    pub fn failing() -> Self {
        Self::default()
    }

    /// Sleep before answering, to hold a run open.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic instead of answering, to exercise the finalizer.
    pub fn panicking(message: &str) -> Self {
        Self { panic_message: Some(message.to_string()), ..Self::default() }
    }
}

#[async_trait]
impl ReleaseSource for FakeReleases {
    async fn resolve_latest(&self, _allow_prerelease: bool) -> Result<ReleaseInfo> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.panic_message {
            panic!("{message}");
        }
        self.release.clone().context("release catalog unreachable")
    }
}

/// [`Fetcher`] that materializes a prepared file instead of downloading.
pub struct FakeFetcher {
    source: Option<PathBuf>,
}

impl FakeFetcher {
    /// Copy `source` to the destination on fetch.
    pub fn serving(source: PathBuf) -> Self {
        Self { source: Some(source) }
    }

    /// Fail every fetch.
    pub fn failing() -> Self {
        Self { source: None }
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        _url: &str,
        dest: &Path,
        status: &StatusHandle,
        band: ProgressBand,
    ) -> Result<()> {
        let Some(source) = &self.source else {
            bail!("connection reset by peer");
        };
        if let Some(parent) = dest.parent() {
            crate::utils::fs::ensure_dir(parent)?;
        }
        tokio::fs::copy(source, dest).await?;
        status.set_progress(band.1);
        Ok(())
    }
}

/// Behavior of one fake backend instance.
#[derive(Debug, Clone)]
pub struct FakeProcessSpec {
    /// Whether the instance stays alive.
    pub alive: bool,
    /// Exit code reported once dead.
    pub exit: Option<i32>,
    /// Process log content written to the sink's file, if any.
    pub log_output: Option<String>,
}

impl FakeProcessSpec {
    /// A healthy long-running instance.
    pub fn running() -> Self {
        Self { alive: true, exit: None, log_output: None }
    }

    /// An instance that dies immediately with `code`.
    pub fn exiting(code: i32, log_output: &str) -> Self {
        Self { alive: false, exit: Some(code), log_output: Some(log_output.to_string()) }
    }
}

/// One recorded `start` call.
#[derive(Debug)]
pub struct StartRecord {
    /// Artifact path passed to start.
    pub artifact: PathBuf,
    /// Artifact bytes at the moment of the call; distinguishes starting
    /// the new artifact from restarting the restored one.
    pub artifact_bytes: Option<Vec<u8>>,
    /// Whether output was discarded (the rollback restart) or logged.
    pub discarded_output: bool,
}

/// Scripted [`Supervisor`] recording every interaction.
#[derive(Default)]
pub struct FakeSupervisor {
    stops: AtomicUsize,
    starts: Mutex<Vec<StartRecord>>,
    specs: Mutex<VecDeque<FakeProcessSpec>>,
    fail_start: std::sync::atomic::AtomicBool,
}

impl FakeSupervisor {
    /// Supervisor whose started instances follow `specs` in order; once the
    /// queue is empty, instances default to healthy.
    pub fn with_specs(specs: impl IntoIterator<Item = FakeProcessSpec>) -> Self {
        Self { specs: Mutex::new(specs.into_iter().collect()), ..Self::default() }
    }

    /// Make every `start` call fail.
    pub fn failing_start() -> Self {
        let supervisor = Self::default();
        supervisor.fail_start.store(true, Ordering::SeqCst);
        supervisor
    }

    /// Number of `stop_all` calls so far.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Drain the recorded `start` calls.
    pub fn start_records(&self) -> Vec<StartRecord> {
        std::mem::take(&mut *self.starts.lock().unwrap())
    }
}

#[async_trait]
impl Supervisor for FakeSupervisor {
    async fn stop_all(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, artifact: &Path, sink: LogSink) -> Result<Box<dyn ProcessHandle>> {
        if self.fail_start.load(Ordering::SeqCst) {
            bail!("exec failed: no such file or directory");
        }

        let spec =
            self.specs.lock().unwrap().pop_front().unwrap_or_else(FakeProcessSpec::running);

        let log_path = match &sink {
            LogSink::File(path) => {
                if let Some(parent) = path.parent() {
                    crate::utils::fs::ensure_dir(parent)?;
                }
                std::fs::write(path, spec.log_output.clone().unwrap_or_default())?;
                Some(path.clone())
            }
            LogSink::Discard => None,
        };

        self.starts.lock().unwrap().push(StartRecord {
            artifact: artifact.to_path_buf(),
            artifact_bytes: std::fs::read(artifact).ok(),
            discarded_output: matches!(sink, LogSink::Discard),
        });

        Ok(Box::new(FakeProcess { alive: spec.alive, exit: spec.exit, log_path }))
    }
}

/// [`ProcessHandle`] driven by a [`FakeProcessSpec`].
pub struct FakeProcess {
    alive: bool,
    exit: Option<i32>,
    log_path: Option<PathBuf>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        4242
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    fn exit_code(&mut self) -> Option<i32> {
        if self.alive { None } else { self.exit }
    }

    fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    async fn terminate(&mut self) -> Result<()> {
        self.alive = false;
        Ok(())
    }

    async fn force_kill(&mut self) -> Result<()> {
        self.alive = false;
        Ok(())
    }
}

/// Counting [`ProxyController`].
#[derive(Default)]
pub struct FakeProxy {
    reloads: AtomicUsize,
}

impl FakeProxy {
    /// Number of reloads so far.
    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyController for FakeProxy {
    async fn reload(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Permissive or denying [`crate::api::auth::AuthGate`] for handler tests.
pub struct FakeAuth {
    allow: bool,
}

impl FakeAuth {
    /// Gate that allows everything.
    pub fn allowing() -> Self {
        Self { allow: true }
    }

    /// Gate that denies everything.
    pub fn denying() -> Self {
        Self { allow: false }
    }
}

#[async_trait]
impl crate::api::auth::AuthGate for FakeAuth {
    async fn verify(&self, _authorization: Option<&str>) -> bool {
        self.allow
    }
}

/// Bind a local HTTP server answering `status` on the health path and
/// return its base URL.
pub async fn spawn_health_server(status: axum::http::StatusCode) -> String {
    use axum::{Router, routing::get};

    let app = Router::new().route("/api/system/health", get(move || async move { status }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
