//! Archive creation and extraction.
//!
//! Update bundles and frontend snapshots are gzip-compressed tarballs. The
//! [`Archiver`] trait keeps the orchestrator and backup manager decoupled
//! from the concrete format so they stay unit-testable; [`TarGzArchiver`]
//! is the production implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Narrow collaborator interface over archive operations.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Pack the contents of `src_dir` into a compressed archive at `dest`.
    async fn create(&self, src_dir: &Path, dest: &Path) -> Result<()>;

    /// Unpack `archive` into `dest_dir`, creating it if needed.
    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()>;
}

/// tar + gzip [`Archiver`].
///
/// The tar and gzip codecs are synchronous, so both operations run on the
/// blocking pool.
pub struct TarGzArchiver;

#[async_trait]
impl Archiver for TarGzArchiver {
    async fn create(&self, src_dir: &Path, dest: &Path) -> Result<()> {
        let src_dir: PathBuf = src_dir.to_path_buf();
        let dest: PathBuf = dest.to_path_buf();
        debug!("Packing {} -> {}", src_dir.display(), dest.display());

        tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::File::create(&dest)
                .with_context(|| format!("Failed to create archive {}", dest.display()))?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);

            // Archive entries are relative to the tree root, so extraction
            // into any directory reproduces the tree in place.
            builder
                .append_dir_all(".", &src_dir)
                .with_context(|| format!("Failed to archive {}", src_dir.display()))?;

            let encoder = builder.into_inner().context("Failed to finish archive")?;
            encoder.finish().context("Failed to finish gzip stream")?;
            Ok(())
        })
        .await
        .context("archive task panicked")?
    }

    async fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        let archive: PathBuf = archive.to_path_buf();
        let dest_dir: PathBuf = dest_dir.to_path_buf();
        debug!("Extracting {} -> {}", archive.display(), dest_dir.display());

        tokio::task::spawn_blocking(move || -> Result<()> {
            crate::utils::fs::ensure_dir(&dest_dir)?;

            let file = std::fs::File::open(&archive)
                .with_context(|| format!("Failed to open archive {}", archive.display()))?;
            let decoder = GzDecoder::new(file);
            let mut reader = tar::Archive::new(decoder);

            reader
                .unpack(&dest_dir)
                .with_context(|| format!("Failed to extract {}", archive.display()))?;
            Ok(())
        })
        .await
        .context("extract task panicked")?
    }
}
