//! Installer
//!
//! Materializes staged bytes where the running application loads them from.

use super::error::{Result, UpdateError};
use super::layout::resolve_relative;
use super::store::write_atomic;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

#[async_trait]
pub trait Installer: Send + Sync {
    /// Make `bytes` the active content for `path`
    async fn install(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Reload/restart the application after a completed update
    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes files below an application directory, each one atomically
#[derive(Debug, Clone)]
pub struct FsInstaller {
    app_dir: PathBuf,
}

impl FsInstaller {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
        }
    }
}

#[async_trait]
impl Installer for FsInstaller {
    async fn install(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = resolve_relative(&self.app_dir, path).map_err(|e| UpdateError::Install {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        write_atomic(&target, bytes)
            .await
            .map_err(|e| UpdateError::Install {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        debug!(path, bytes = bytes.len(), "Installed file");
        Ok(())
    }
}
