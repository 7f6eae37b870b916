//! Release catalog access.
//!
//! [`ReleaseResolver`] queries the GitHub releases API for the latest
//! eligible release and returns normalized [`ReleaseInfo`] metadata. Nothing
//! here is persisted; release metadata is fetched fresh on every check.
//!
//! The resolver intentionally collapses all failure modes (network error,
//! non-2xx status, malformed JSON, empty catalog) into a single error shape:
//! callers must not behave differently for "no release exists" versus
//! "catalog unreachable", since both block an update attempt identically.

mod compare;

pub use compare::compare;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// A downloadable release asset.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetRef {
    /// Asset file name as published.
    pub name: String,
    /// Direct download URL.
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// Normalized metadata for one release, fetched fresh per check.
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseInfo {
    /// Release tag, e.g. `v1.2.0`.
    #[serde(rename = "tag_name")]
    pub tag: String,
    /// Display name of the release.
    #[serde(default)]
    pub name: String,
    /// Release notes body.
    #[serde(default)]
    pub body: String,
    /// Publication timestamp as reported by the catalog.
    #[serde(default)]
    pub published_at: String,
    /// Whether the catalog marks this release as a pre-release.
    #[serde(default)]
    pub prerelease: bool,
    /// Downloadable assets attached to the release.
    #[serde(default)]
    pub assets: Vec<AssetRef>,
}

impl ReleaseInfo {
    /// The bare version encoded in the tag (leading `v` stripped).
    pub fn version(&self) -> &str {
        self.tag.trim_start_matches('v')
    }

    /// Select the update bundle among the release assets.
    ///
    /// The bundle is the asset whose name ends with `suffix`. Zero matches
    /// is a resolution failure for the caller; multiple matches are a data
    /// quality concern, not a crash; the first match wins and a warning is
    /// logged.
    pub fn update_asset(&self, suffix: &str) -> Option<&AssetRef> {
        let mut matches = self.assets.iter().filter(|asset| asset.name.ends_with(suffix));
        let first = matches.next()?;
        if let Some(second) = matches.next() {
            warn!(
                "Release {} has multiple assets matching '{suffix}' ({} and {}); using the first",
                self.tag, first.name, second.name
            );
        }
        Some(first)
    }
}

/// Source of release metadata, abstracted so the orchestrator and the check
/// endpoint are testable without a live catalog.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Resolve the latest eligible release.
    ///
    /// In non-prerelease mode only the latest stable release qualifies; in
    /// prerelease-allowed mode the most recent release of any kind is
    /// taken. All failure modes collapse into one error.
    async fn resolve_latest(&self, allow_prerelease: bool) -> Result<ReleaseInfo>;
}

/// GitHub-backed [`ReleaseSource`].
pub struct ReleaseResolver {
    client: reqwest::Client,
    api_base: String,
    repo: String,
}

impl ReleaseResolver {
    /// Create a resolver for `owner/repo` against the public GitHub API.
    pub fn new(repo: impl Into<String>) -> Self {
        Self::with_api_base("https://api.github.com", repo)
    }

    /// Create a resolver against a custom API base URL.
    ///
    /// Used by tests to point at a local catalog stub, and available for
    /// GitHub Enterprise deployments.
    pub fn with_api_base(api_base: impl Into<String>, repo: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            repo: repo.into(),
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("GET {url} returned HTTP {status}");
        }

        response.json::<T>().await.with_context(|| format!("parsing response from {url}"))
    }
}

#[async_trait]
impl ReleaseSource for ReleaseResolver {
    async fn resolve_latest(&self, allow_prerelease: bool) -> Result<ReleaseInfo> {
        if allow_prerelease {
            // The releases list is newest-first; take the head regardless of
            // its prerelease flag.
            let url = format!("{}/repos/{}/releases", self.api_base, self.repo);
            let releases: Vec<ReleaseInfo> = self.get_json(&url).await?;

            let latest = releases.into_iter().next().context("release catalog is empty")?;
            debug!("Resolved release {} (prerelease: {})", latest.tag, latest.prerelease);
            Ok(latest)
        } else {
            let url = format!("{}/repos/{}/releases/latest", self.api_base, self.repo);
            let latest: ReleaseInfo = self.get_json(&url).await?;
            debug!("Resolved stable release {}", latest.tag);
            Ok(latest)
        }
    }
}
