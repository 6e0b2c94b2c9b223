//! Update Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpdateError {
    /// Transport failure, non-2xx status or timeout
    #[error("Network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
    },

    /// Manifest signature invalid or document malformed
    #[error("Trust error: {0}")]
    Trust(String),

    #[error("Integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("No snapshot available to restore")]
    NoSnapshot,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Install failed for {path}: {reason}")]
    Install { path: String, reason: String },

    #[error("Client version {current} is below the minimum {minimum} for this update")]
    Incompatible { current: String, minimum: String },

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Nothing pending")]
    NothingPending,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("An update cycle is already running")]
    Busy,
}

impl UpdateError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            status: None,
        }
    }

    /// Stable short name, used in observations and JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Trust(_) => "trust",
            Self::Integrity { .. } => "integrity",
            Self::NoSnapshot => "no_snapshot",
            Self::Store(_) => "store",
            Self::Install { .. } => "install",
            Self::Incompatible { .. } => "incompatible",
            Self::InvalidVersion(_) => "invalid_version",
            Self::InvalidDigest(_) => "invalid_digest",
            Self::NothingPending => "nothing_pending",
            Self::Cancelled => "cancelled",
            Self::Busy => "busy",
        }
    }

    /// Failures a check attempt may retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Trust(_))
    }
}

impl From<reqwest::Error> for UpdateError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
        }
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(e: std::io::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for UpdateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
