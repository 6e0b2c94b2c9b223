//! Release Manifest
//!
//! Typed view of the manifest document published for each channel.

use super::error::UpdateError;
use super::locale::select_changelog;
use super::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Release track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    Beta,
    Dev,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Beta => "beta",
            Self::Dev => "dev",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "beta" => Ok(Self::Beta),
            "dev" => Ok(Self::Dev),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// One distributable file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Relative path, the identity key across versions
    pub path: String,
    #[serde(alias = "hash")]
    pub digest: String,
    /// Declared byte length, progress accounting only
    pub size: u64,
    pub url: String,
    #[serde(default)]
    pub critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

fn default_min_version() -> Version {
    Version::new(0, 0, 0)
}

/// Release manifest as published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub channel: Channel,
    #[serde(default = "default_min_version")]
    pub min_version: Version,
    #[serde(default)]
    pub breaking: bool,
    #[serde(default)]
    pub changelog: BTreeMap<String, String>,
    pub files: Vec<FileEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Manifest {
    /// Sum of declared file sizes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Changelog text for a locale, with fallback
    pub fn changelog_for(&self, preferred: &str, fallback: &str) -> String {
        select_changelog(&self.changelog, preferred, fallback)
            .unwrap_or_default()
            .to_string()
    }

    /// Check if a client at `current` may apply this manifest directly
    pub fn can_upgrade_from(&self, current: &Version) -> bool {
        !self.min_version.is_newer_than(current)
    }

    /// Paths must be unique within a manifest
    pub fn check_unique_paths(&self) -> Result<(), UpdateError> {
        let mut seen = HashSet::new();
        for file in &self.files {
            if !seen.insert(file.path.as_str()) {
                return Err(UpdateError::Trust(format!(
                    "duplicate file path in manifest: {}",
                    file.path
                )));
            }
        }
        Ok(())
    }
}

/// A manifest whose signature has been checked.
///
/// Only `ManifestVerifier` constructs these.
#[derive(Debug, Clone)]
pub struct TrustedManifest {
    manifest: Manifest,
    signed: bool,
}

impl TrustedManifest {
    pub(crate) fn new(manifest: Manifest, signed: bool) -> Self {
        Self { manifest, signed }
    }

    /// False for unsigned developer builds accepted leniently
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn into_inner(self) -> Manifest {
        self.manifest
    }
}

impl Deref for TrustedManifest {
    type Target = Manifest;

    fn deref(&self) -> &Manifest {
        &self.manifest
    }
}
