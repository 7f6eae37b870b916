//! Service configuration.
//!
//! Everything the updater needs to know about its deployment is collected
//! in [`ServiceConfig`], parsed from command-line flags with environment
//! variable fallbacks (`UPKEEPER_*`). Defaults match the standard container
//! layout: the app under `/app`, the frontend under the proxy's document
//! root, logs under `/var/log/upkeeper`.
//!
//! Derived paths (`updates/`, `backups/`, `version.json`, log files) hang
//! off the configured roots and are exposed as accessor methods so path
//! construction lives in exactly one place.

use clap::Parser;
use std::path::PathBuf;

/// Runtime configuration for the update service.
#[derive(Debug, Clone, Parser)]
#[command(name = "upkeeper", version, about)]
pub struct ServiceConfig {
    /// GitHub repository publishing releases, as `owner/repo`.
    #[arg(long, env = "UPKEEPER_GITHUB_REPO", default_value = "example/app")]
    pub github_repo: String,

    /// Whether pre-releases are eligible for installation.
    #[arg(long, env = "UPKEEPER_ALLOW_PRERELEASE")]
    pub allow_prerelease: bool,

    /// Application directory holding the backend artifact, version record,
    /// update staging area and backups.
    #[arg(long, env = "UPKEEPER_APP_DIR", default_value = "/app")]
    pub app_dir: PathBuf,

    /// Directory the reverse proxy serves the frontend from.
    #[arg(long, env = "UPKEEPER_FRONTEND_DIR", default_value = "/usr/share/nginx/html")]
    pub frontend_dir: PathBuf,

    /// Installed backend artifact file name inside the app directory.
    #[arg(long, env = "UPKEEPER_ARTIFACT_NAME", default_value = "app.jar")]
    pub artifact_name: String,

    /// Base URL of the managed backend.
    #[arg(long, env = "UPKEEPER_BACKEND_URL", default_value = "http://localhost:8000")]
    pub backend_url: String,

    /// Health endpoint path on the backend.
    #[arg(long, env = "UPKEEPER_HEALTH_PATH", default_value = "/api/system/health")]
    pub health_path: String,

    /// Authorization verification path on the backend.
    #[arg(long, env = "UPKEEPER_AUTH_PATH", default_value = "/api/auth/verify")]
    pub auth_path: String,

    /// Address the updater's own HTTP surface listens on.
    #[arg(long, env = "UPKEEPER_LISTEN", default_value = "0.0.0.0:9090")]
    pub listen: String,

    /// Directory for the updater's operation log and backend run logs.
    #[arg(long, env = "UPKEEPER_LOG_DIR", default_value = "/var/log/upkeeper")]
    pub log_dir: PathBuf,

    /// Launch command for the backend; `{artifact}` is substituted with the
    /// artifact path. Split on whitespace.
    #[arg(
        long,
        env = "UPKEEPER_LAUNCH",
        default_value = "java -jar {artifact} --spring.profiles.active=prod"
    )]
    pub launch: String,

    /// `pkill -f` pattern recognizing running backend instances.
    #[arg(long, env = "UPKEEPER_KILL_PATTERN", default_value = "java -jar")]
    pub kill_pattern: String,

    /// Proxy reload command. Split on whitespace.
    #[arg(long, env = "UPKEEPER_PROXY_RELOAD", default_value = "nginx -s reload")]
    pub proxy_reload: String,

    /// Suffix marking a release asset as the update bundle.
    #[arg(long, env = "UPKEEPER_ASSET_SUFFIX", default_value = "-update.tar.gz")]
    pub asset_suffix: String,

    /// Seconds the health gate waits for a freshly started backend.
    #[arg(long, env = "UPKEEPER_HEALTH_BUDGET", default_value_t = 90)]
    pub health_budget_secs: u64,

    /// Seconds to wait after signalling backend instances to stop.
    #[arg(long, env = "UPKEEPER_STOP_GRACE", default_value_t = 2)]
    pub stop_grace_secs: u64,

    /// Backup units to retain after a successful update; 0 keeps all.
    #[arg(long, env = "UPKEEPER_BACKUP_RETENTION", default_value_t = 10)]
    pub backup_retention: usize,
}

impl ServiceConfig {
    /// Parse a config for tests, overriding defaults with the given flags.
    ///
    /// Example: `ServiceConfig::from_args(["--app-dir", "/tmp/x"])`.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = std::iter::once("upkeeper".to_string()).chain(args.into_iter().map(Into::into));
        Self::parse_from(argv)
    }

    /// Installed backend artifact path.
    pub fn backend_artifact(&self) -> PathBuf {
        self.app_dir.join(&self.artifact_name)
    }

    /// Persisted version record path.
    pub fn version_file(&self) -> PathBuf {
        self.app_dir.join("version.json")
    }

    /// Staging directory for downloaded bundles.
    pub fn updates_dir(&self) -> PathBuf {
        self.app_dir.join("updates")
    }

    /// Extraction directory for the bundle currently being applied.
    pub fn extract_dir(&self) -> PathBuf {
        self.updates_dir().join("current")
    }

    /// Root directory of backup units.
    pub fn backups_dir(&self) -> PathBuf {
        self.app_dir.join("backups")
    }

    /// The updater's own operation log file.
    pub fn operation_log(&self) -> PathBuf {
        self.log_dir.join("upkeeper.log")
    }

    /// Log file capturing a freshly launched backend's output during the
    /// health wait.
    pub fn backend_log(&self) -> PathBuf {
        self.log_dir.join("backend-update.log")
    }

    /// Full health endpoint URL on the backend.
    pub fn health_url(&self) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), self.health_path)
    }

    /// Full authorization verification URL on the backend.
    pub fn auth_url(&self) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), self.auth_path)
    }

    /// Launch template split into argv form.
    pub fn launch_argv(&self) -> Vec<String> {
        self.launch.split_whitespace().map(str::to_string).collect()
    }

    /// Proxy reload command split into argv form.
    pub fn proxy_argv(&self) -> Vec<String> {
        self.proxy_reload.split_whitespace().map(str::to_string).collect()
    }
}
