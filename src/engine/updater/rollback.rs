//! Rollback Manager
//!
//! Single-slot snapshot of the applied-state record. Taking a new snapshot
//! replaces the previous one.

use super::error::{Result, UpdateError};
use super::state::{Snapshot, APPLIED_STATE_KEY, SNAPSHOT_KEY};
use super::store::{KeyValueStore, StagingCache};
use super::version::Version;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RollbackManager {
    store: Arc<dyn KeyValueStore>,
    staging: Arc<dyn StagingCache>,
}

impl RollbackManager {
    pub fn new(store: Arc<dyn KeyValueStore>, staging: Arc<dyn StagingCache>) -> Self {
        Self { store, staging }
    }

    /// Capture the live record into the snapshot slot
    pub async fn snapshot(&self, current_version: Version) -> Result<Snapshot> {
        let applied_state = match self.store.get(APPLIED_STATE_KEY).await? {
            Some(bytes) => Some(String::from_utf8(bytes).map_err(|e| {
                UpdateError::Store(format!("Applied state is not valid UTF-8: {}", e))
            })?),
            None => None,
        };

        let snapshot = Snapshot {
            version: current_version,
            created_at: Utc::now(),
            applied_state,
        };
        let content = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| UpdateError::Store(format!("Failed to serialize snapshot: {}", e)))?;
        self.store.set(SNAPSHOT_KEY, &content).await?;

        info!(version = %current_version, "Snapshot taken");
        Ok(snapshot)
    }

    /// The snapshot currently held, if any
    pub async fn current(&self) -> Result<Option<Snapshot>> {
        match self.store.get(SNAPSHOT_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| UpdateError::Store(format!("Failed to parse snapshot: {}", e))),
            None => Ok(None),
        }
    }

    /// Put the snapshot back as the live record and drop staged files.
    ///
    /// The snapshot is consumed.
    pub async fn restore(&self) -> Result<Snapshot> {
        let snapshot = self.current().await?.ok_or(UpdateError::NoSnapshot)?;

        match &snapshot.applied_state {
            Some(raw) => self.store.set(APPLIED_STATE_KEY, raw.as_bytes()).await?,
            None => self.store.delete(APPLIED_STATE_KEY).await?,
        }

        if let Err(e) = self.staging.clear().await {
            warn!(error = %e, "Failed to clear staged files during restore");
        }
        self.store.delete(SNAPSHOT_KEY).await?;

        info!(version = %snapshot.version, "Applied state restored from snapshot");
        Ok(snapshot)
    }

    /// Drop the snapshot after a successful install
    pub async fn discard(&self) -> Result<()> {
        self.store.delete(SNAPSHOT_KEY).await
    }
}
