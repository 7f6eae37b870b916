//! Download integrity checking.
//!
//! Releases may publish a checksums file alongside the update bundle. When
//! one is present the downloaded archive is verified against it before any
//! destructive step runs; when absent, verification is skipped with a
//! warning. This catches corrupted or truncated downloads; it is an
//! integrity check, not a signature scheme.

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

/// SHA256 verification of downloaded bundles.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Compute the hex-encoded SHA256 checksum of a file.
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for {}", file_path.display());

        let contents = fs::read(file_path)
            .await
            .with_context(|| format!("Failed to read file: {}", file_path.display()))?;

        let mut hasher = Sha256::new();
        hasher.update(&contents);
        let digest = hasher.finalize();

        Ok(format!("{digest:x}"))
    }

    /// Verify a file against an expected hex checksum (case-insensitive).
    pub async fn verify_checksum(file_path: &Path, expected: &str) -> Result<()> {
        let actual = Self::compute_sha256(file_path).await?;

        if !actual.eq_ignore_ascii_case(expected.trim()) {
            bail!(
                "Checksum verification failed for {}\n  Expected: {expected}\n  Actual:   {actual}",
                file_path.display()
            );
        }

        info!("Checksum verified for {}", file_path.display());
        Ok(())
    }

    /// Find the expected checksum for `file_name` in a checksums document.
    ///
    /// Accepts the usual `<hex>  <name>` one-per-line format; returns `None`
    /// when the file is not listed.
    pub fn find_in_manifest(manifest: &str, file_name: &str) -> Option<String> {
        for line in manifest.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(checksum), Some(name)) = (parts.next(), parts.next()) {
                if name == file_name || name.ends_with(&format!("/{file_name}")) {
                    return Some(checksum.to_string());
                }
            }
        }
        None
    }

    /// Verify a downloaded bundle against a release checksums file at
    /// `manifest_url`, if the file lists it.
    ///
    /// Returns `Ok(true)` when verification ran and passed, `Ok(false)`
    /// when no checksum was available (verification skipped), and an error
    /// when the checksums disagree.
    pub async fn verify_from_manifest_url(
        client: &reqwest::Client,
        file_path: &Path,
        file_name: &str,
        manifest_url: &str,
    ) -> Result<bool> {
        let response = client
            .get(manifest_url)
            .send()
            .await
            .with_context(|| format!("GET {manifest_url}"))?;

        if !response.status().is_success() {
            warn!("Checksums file at {manifest_url} returned HTTP {}", response.status());
            return Ok(false);
        }

        let manifest = response.text().await.context("Failed to read checksums file")?;
        match Self::find_in_manifest(&manifest, file_name) {
            Some(expected) => {
                Self::verify_checksum(file_path, &expected).await?;
                Ok(true)
            }
            None => {
                warn!("No checksum listed for {file_name}; skipping verification");
                Ok(false)
            }
        }
    }
}
