//! UpdateKit Configuration Module
//! Handles loading and validating updater.config.json

use crate::engine::updater::manifest::Channel;
use crate::engine::updater::verify::{KeyType, PublicKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "updater.config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    pub manifest_url: String,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default = "default_true")]
    pub auto_check: bool,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_download: bool,
    #[serde(default)]
    pub auto_install: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Accept unsigned manifests; turn off in production
    #[serde(default = "default_true")]
    pub allow_unsigned: bool,
    /// How `public_key` is encoded and which signatures it checks
    #[serde(default)]
    pub key_type: KeyType,
    /// Hex ED25519 key, or a PEM RSA key when `key_type` is rsa-pkcs1-sha256
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default = "default_fallback_locale")]
    pub fallback_locale: String,
    #[serde(default = "default_reload_delay")]
    pub reload_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_check_interval() -> u64 {
    3600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    5000
}

fn default_fallback_locale() -> String {
    "en".to_string()
}

fn default_reload_delay() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    30
}

impl UpdaterConfig {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: UpdaterConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn for_manifest_url(manifest_url: &str) -> Self {
        Self {
            manifest_url: manifest_url.to_string(),
            channel: Channel::default(),
            auto_check: true,
            check_interval_secs: default_check_interval(),
            auto_download: true,
            auto_install: false,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            allow_unsigned: true,
            key_type: KeyType::default(),
            public_key: None,
            fallback_locale: default_fallback_locale(),
            reload_delay_ms: default_reload_delay(),
            request_timeout_secs: default_request_timeout(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.manifest_url.trim().is_empty() {
            return Err(ConfigError::Invalid("manifest_url must not be empty".to_string()));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Invalid("check_interval_secs must be positive".to_string()));
        }
        self.trust_key()?;
        Ok(())
    }

    /// Parsed public key, if one is configured
    pub fn trust_key(&self) -> Result<Option<PublicKey>, ConfigError> {
        self.public_key
            .as_deref()
            .map(|key| {
                PublicKey::parse(self.key_type, key).map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .transpose()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Backoff before retry attempt `attempt` (1-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }

    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
