//! Update bundle download.
//!
//! [`ArtifactFetcher`] streams a release asset to local storage in chunks
//! (bundles can be large, so the payload is never buffered in memory) and
//! reports byte-level progress scaled into the progress band the caller
//! allots to the download stage.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::status::StatusHandle;

/// Inclusive progress range a stage is allowed to occupy, e.g. `(10, 40)`.
pub type ProgressBand = (u8, u8);

/// Downloads a remote asset to a local path.
///
/// Abstracted so orchestrator tests can substitute a fake that materializes
/// a prepared bundle instead of touching the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream `url` to `dest`, reporting progress into `band` on `status`.
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        status: &StatusHandle,
        band: ProgressBand,
    ) -> Result<()>;
}

/// HTTP-backed [`Fetcher`] with a generous timeout; update bundles may
/// take minutes on slow links.
pub struct ArtifactFetcher {
    client: reqwest::Client,
}

impl Default for ArtifactFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl ArtifactFetcher {
    /// Create a fetcher with the given overall request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ArtifactFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        status: &StatusHandle,
        band: ProgressBand,
    ) -> Result<()> {
        info!("Downloading {url} -> {}", dest.display());

        let response = self.client.get(url).send().await.with_context(|| format!("GET {url}"))?;
        let http_status = response.status();
        if !http_status.is_success() {
            bail!("GET {url} returned HTTP {http_status}");
        }

        // Content-Length may be absent; progress reporting is then skipped
        // and the band is closed out when the stream ends.
        let total = response.content_length().unwrap_or(0);
        let (band_start, band_end) = band;
        let band_width = band_end.saturating_sub(band_start);

        if let Some(parent) = dest.parent() {
            crate::utils::fs::ensure_dir(parent)?;
        }
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("stream error while downloading {url}"))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;

            downloaded += chunk.len() as u64;
            if total > 0 {
                let scaled = band_start + ((downloaded * u64::from(band_width)) / total) as u8;
                status.set_progress(scaled.min(band_end));
            }
        }

        file.flush().await.with_context(|| format!("Failed to flush {}", dest.display()))?;
        status.set_progress(band_end);

        debug!("Downloaded {downloaded} bytes to {}", dest.display());
        Ok(())
    }
}
