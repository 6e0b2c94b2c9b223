//! Lifecycle Observations
//!
//! The engine pushes events into a `Notifier`; it never reads anything back.

use super::state::UpdatePhase;
use super::version::Version;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Observation emitted by the update engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum UpdateEvent {
    Checking,
    UpToDate {
        version: Version,
    },
    #[serde(rename_all = "camelCase")]
    UpdateAvailable {
        version: Version,
        changelog: String,
        size: u64,
        breaking: bool,
    },
    DownloadProgress {
        percent: u8,
    },
    Downloaded {
        version: Version,
    },
    Installing {
        version: Version,
    },
    Completed {
        version: Version,
    },
    RolledBack {
        version: Version,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        phase: UpdatePhase,
        kind: String,
        target_version: Option<Version>,
    },
    /// Restore after a failed install itself failed; the client may be
    /// partially installed
    RollbackFailed {
        message: String,
        version: Option<Version>,
    },
    #[serde(rename_all = "camelCase")]
    ReloadScheduled {
        delay_ms: u64,
    },
    RestartRequired {
        version: Version,
    },
}

impl UpdateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::UpToDate { .. } => "up-to-date",
            Self::UpdateAvailable { .. } => "update-available",
            Self::DownloadProgress { .. } => "download-progress",
            Self::Downloaded { .. } => "downloaded",
            Self::Installing { .. } => "installing",
            Self::Completed { .. } => "completed",
            Self::RolledBack { .. } => "rolled-back",
            Self::Error { .. } => "error",
            Self::RollbackFailed { .. } => "rollback-failed",
            Self::ReloadScheduled { .. } => "reload-scheduled",
            Self::RestartRequired { .. } => "restart-required",
        }
    }
}

/// Sink for lifecycle observations
pub trait Notifier: Send + Sync {
    fn notify(&self, event: UpdateEvent);
}

/// Renders observations as log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: UpdateEvent) {
        match &event {
            UpdateEvent::Error { message, phase, .. } => {
                warn!(%phase, "Update error: {}", message);
            }
            UpdateEvent::RollbackFailed { message, .. } => {
                error!("Rollback failed, installation may be incomplete: {}", message);
            }
            UpdateEvent::DownloadProgress { percent } => {
                info!(percent, "Download progress");
            }
            other => info!(event = other.name(), "{:?}", other),
        }
    }
}

/// Forwards observations to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<UpdateEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: UpdateEvent) {
        // A dropped receiver only means nobody is rendering
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = UpdateEvent::UpdateAvailable {
            version: Version::new(3, 5, 1),
            changelog: "Update".to_string(),
            size: 100,
            breaking: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "update-available");
        assert_eq!(json["version"], "3.5.1");
        assert_eq!(json["size"], 100);

        let error = UpdateEvent::Error {
            message: "HTTP 500".to_string(),
            phase: UpdatePhase::Checking,
            kind: "network".to_string(),
            target_version: None,
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["phase"], "checking");
        assert!(json["targetVersion"].is_null());
    }

    #[tokio::test]
    async fn test_channel_notifier() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        notifier.notify(UpdateEvent::Checking);
        notifier.notify(UpdateEvent::DownloadProgress { percent: 10 });
        assert_eq!(receiver.recv().await, Some(UpdateEvent::Checking));
        assert_eq!(
            receiver.recv().await,
            Some(UpdateEvent::DownloadProgress { percent: 10 })
        );

        drop(receiver);
        notifier.notify(UpdateEvent::Checking);
    }
}
