//! Update State
//!
//! Persisted applied-state record, the rollback snapshot, and the
//! transient session driven by the update state machine.

use super::error::{Result, UpdateError};
use super::manifest::FileEntry;
use super::store::KeyValueStore;
use super::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Store key of the live applied-state record
pub const APPLIED_STATE_KEY: &str = "applied_state";
/// Store key of the single snapshot slot
pub const SNAPSHOT_KEY: &str = "snapshot";

/// What the client currently has installed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
    /// Last successfully installed version
    pub version: Version,
    /// Path -> digest last applied for that path
    #[serde(default)]
    pub file_digests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AppliedState {
    /// State of a client that has never applied an update
    pub fn initial(version: Version) -> Self {
        Self {
            version,
            file_digests: BTreeMap::new(),
            updated_at: None,
        }
    }

    /// Load the live record, `None` if none was ever written
    pub async fn load(store: &dyn KeyValueStore) -> Result<Option<Self>> {
        match store.get(APPLIED_STATE_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| UpdateError::Store(format!("Failed to parse applied state: {}", e))),
            None => Ok(None),
        }
    }

    /// Load the live record or fall back to `initial(current)`
    pub async fn load_or_initial(store: &dyn KeyValueStore, current: Version) -> Result<Self> {
        Ok(Self::load(store).await?.unwrap_or_else(|| Self::initial(current)))
    }

    pub async fn save(&self, store: &dyn KeyValueStore) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| UpdateError::Store(format!("Failed to serialize applied state: {}", e)))?;
        store.set(APPLIED_STATE_KEY, &content).await
    }

    /// Record a successful install of `delta` at `version`
    pub fn record_install(&mut self, version: Version, delta: &[FileEntry]) {
        self.version = version;
        for file in delta {
            self.file_digests.insert(file.path.clone(), file.digest.clone());
        }
        self.updated_at = Some(Utc::now());
    }
}

/// Point-in-time copy of the live applied-state record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Version marker at snapshot time
    pub version: Version,
    pub created_at: DateTime<Utc>,
    /// Raw bytes of the live record as stored, `None` if there was none
    pub applied_state: Option<String>,
}

impl Snapshot {
    /// Parsed view of the captured record
    pub fn applied(&self) -> Result<Option<AppliedState>> {
        self.applied_state
            .as_deref()
            .map(|raw| {
                serde_json::from_str(raw)
                    .map_err(|e| UpdateError::Store(format!("Failed to parse snapshot: {}", e)))
            })
            .transpose()
    }
}

/// Phase of the update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    #[default]
    Idle,
    Checking,
    Downloading,
    Installing,
    RolledBack,
    Failed,
    Completed,
}

impl UpdatePhase {
    /// Phases that exclude each other and any new cycle
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Checking | Self::Downloading | Self::Installing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Downloading => "downloading",
            Self::Installing => "installing",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient state of one check/download/install cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSession {
    pub id: Uuid,
    pub phase: UpdatePhase,
    /// 0-100, never decreases while downloading
    pub progress: u8,
    pub last_error: Option<String>,
    /// Version the cycle is working towards
    pub target_version: Option<Version>,
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for UpdateSession {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: UpdatePhase::Idle,
            progress: 0,
            last_error: None,
            target_version: None,
            last_check: None,
        }
    }
}

impl UpdateSession {
    /// Transition to checking; starts a new session id
    pub fn start_checking(&mut self) {
        self.id = Uuid::new_v4();
        self.phase = UpdatePhase::Checking;
        self.last_error = None;
        self.target_version = None;
        self.progress = 0;
        self.last_check = Some(Utc::now());
    }

    pub fn start_downloading(&mut self, target: Version) {
        self.phase = UpdatePhase::Downloading;
        self.last_error = None;
        self.target_version = Some(target);
        self.progress = 0;
    }

    /// Record download progress, returns true if the value moved
    pub fn update_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            true
        } else {
            false
        }
    }

    pub fn start_installing(&mut self) {
        self.phase = UpdatePhase::Installing;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, reason: String) {
        self.phase = UpdatePhase::Failed;
        self.last_error = Some(reason);
    }

    pub fn mark_rolled_back(&mut self, reason: String) {
        self.phase = UpdatePhase::RolledBack;
        self.last_error = Some(reason);
    }

    pub fn mark_completed(&mut self) {
        self.phase = UpdatePhase::Completed;
        self.progress = 100;
    }

    /// Back to idle, keeping the error and target for inspection
    pub fn reset(&mut self) {
        self.phase = UpdatePhase::Idle;
    }
}
