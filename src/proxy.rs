//! Reverse-proxy reload.
//!
//! The frontend tree is served by an external reverse proxy that must be
//! reloaded after its document root changes. The orchestrator only ever
//! needs one operation, so the collaborator interface is a single method
//! that is trivially fakeable in tests.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

/// Narrow collaborator interface over the proxy reload command.
#[async_trait]
pub trait ProxyController: Send + Sync {
    /// Ask the proxy to reload its configuration and document root.
    async fn reload(&self) -> Result<()>;
}

/// [`ProxyController`] invoking a configured external command, by default
/// `nginx -s reload`.
pub struct CommandProxy {
    command: Vec<String>,
}

impl CommandProxy {
    /// Create a controller running the given argv.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ProxyController for CommandProxy {
    async fn reload(&self) -> Result<()> {
        if self.command.is_empty() {
            bail!("proxy reload command is empty");
        }

        info!("Reloading proxy: {}", self.command.join(" "));
        let status = Command::new(&self.command[0])
            .args(&self.command[1..])
            .status()
            .await
            .with_context(|| format!("Failed to run '{}'", self.command[0]))?;

        if !status.success() {
            bail!("proxy reload exited with {status}");
        }
        Ok(())
    }
}
