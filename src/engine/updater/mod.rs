//! UpdateKit Self-Update Engine
//!
//! Signed-manifest, delta-based, rollback-safe updates.
//!
//! Components:
//! - `verify` - Manifest fetch and signature verification
//! - `delta` - Which files changed since the applied state
//! - `integrity` - Per-file digest checks
//! - `rollback` - Single-slot snapshot and restore
//! - `manager` - The check/download/install state machine

pub mod canonical;
pub mod delta;
pub mod digest;
pub mod download;
pub mod error;
pub mod installer;
pub mod integrity;
pub mod layout;
pub mod locale;
pub mod manager;
pub mod manifest;
pub mod notify;
pub mod rollback;
pub mod state;
pub mod store;
pub mod verify;
pub mod version;

pub use delta::DeltaEngine;
pub use download::{HttpTransport, Transport};
pub use error::{Result, UpdateError};
pub use installer::{FsInstaller, Installer};
pub use integrity::IntegrityValidator;
pub use layout::UpdaterLayout;
pub use locale::{EnvLocale, FixedLocale, LocaleSource};
pub use manager::{Collaborators, PeriodicChecks, UpdateManager, UpdateOutcome};
pub use manifest::{Channel, FileEntry, Manifest, TrustedManifest};
pub use notify::{ChannelNotifier, Notifier, TracingNotifier, UpdateEvent};
pub use rollback::RollbackManager;
pub use state::{AppliedState, Snapshot, UpdatePhase, UpdateSession};
pub use store::{FileStagingCache, FileStore, KeyValueStore, MemoryStagingCache, MemoryStore, StagingCache};
pub use verify::{KeyType, ManifestVerifier, PublicKey};
pub use version::Version;
