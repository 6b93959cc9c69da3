//! On-disk spool of undelivered envelopes.
//!
//! The spool is a JSON array of [`Delivery`] records written on shutdown
//! and consumed on the next start. A missing file is an empty spool.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Delivery, QueueError, QueueResult};

#[derive(Debug, Clone)]
pub struct Spool {
    path: PathBuf,
}

impl Spool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the spool contents. An empty batch removes the file.
    pub async fn save(&self, deliveries: &[Delivery]) -> QueueResult<()> {
        if deliveries.is_empty() {
            return self.clear().await;
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(spool_err)?;
        }
        let bytes = serde_json::to_vec_pretty(deliveries)
            .map_err(|e| QueueError::Serialize(e.to_string()))?;
        tokio::fs::write(&self.path, bytes).await.map_err(spool_err)?;
        info!(path = %self.path.display(), count = deliveries.len(), "Spooled pending deliveries");
        Ok(())
    }

    /// Reads and removes the spooled deliveries.
    pub async fn take(&self) -> QueueResult<Vec<Delivery>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No spool file");
                return Ok(Vec::new());
            }
            Err(e) => return Err(spool_err(e)),
        };
        let deliveries: Vec<Delivery> =
            serde_json::from_slice(&bytes).map_err(|e| QueueError::Serialize(e.to_string()))?;
        self.clear().await?;
        Ok(deliveries)
    }

    async fn clear(&self) -> QueueResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(spool_err(e)),
        }
    }
}

fn spool_err(err: std::io::Error) -> QueueError {
    QueueError::Spool(err.to_string())
}
