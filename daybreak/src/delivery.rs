//! Digest hand-off to downstream rendering and delivery.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::Digest;
use crate::errors::{DaybreakError, Result};
use crate::utils::io::write_json;

/// Consumer of a finished digest.
///
/// A successful return means the digest has been handed off; the daily run
/// then marks the day as sent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DigestSink: Send + Sync {
    /// Hands off the digest.
    async fn deliver(&self, digest: &Digest) -> Result<()>;
}

/// Writes the digest as pretty JSON for a renderer to pick up.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    /// Creates a sink writing to `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DigestSink for JsonFileSink {
    async fn deliver(&self, digest: &Digest) -> Result<()> {
        let path = self.path.clone();
        let digest = digest.clone();
        tokio::task::spawn_blocking(move || write_json(&path, &digest))
            .await
            .map_err(|e| DaybreakError::Internal(format!("delivery task failed: {e}")))?
            .map_err(|e| DaybreakError::Delivery(format!("{}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), "Digest written");
        Ok(())
    }
}
