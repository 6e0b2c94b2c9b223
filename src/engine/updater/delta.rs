//! Delta computation
//!
//! Selects the manifest files whose declared digest differs from the one
//! last applied. Files dropped from the manifest are left alone.

use super::digest::digests_match;
use super::error::Result;
use super::manifest::{FileEntry, Manifest};
use super::state::AppliedState;
use super::store::StagingCache;
use std::sync::Arc;
use tracing::debug;

pub struct DeltaEngine {
    staging: Arc<dyn StagingCache>,
}

impl DeltaEngine {
    pub fn new(staging: Arc<dyn StagingCache>) -> Self {
        Self { staging }
    }

    /// Files needing download, in manifest order
    pub fn compute_delta(&self, manifest: &Manifest, applied: &AppliedState) -> Vec<FileEntry> {
        let delta: Vec<FileEntry> = manifest
            .files
            .iter()
            .filter(|entry| match applied.file_digests.get(&entry.path) {
                Some(current) => !digests_match(current, &entry.digest),
                None => true,
            })
            .cloned()
            .collect();

        debug!(
            total = manifest.files.len(),
            changed = delta.len(),
            "Computed delta"
        );
        delta
    }

    /// Discard staged bytes. Applied state is untouched.
    pub async fn clear_cache(&self) -> Result<()> {
        self.staging.clear().await
    }
}

/// Critical files first, each group keeping its order
pub fn install_order(delta: &[FileEntry]) -> Vec<&FileEntry> {
    let (critical, rest): (Vec<&FileEntry>, Vec<&FileEntry>) =
        delta.iter().partition(|entry| entry.critical);
    critical.into_iter().chain(rest).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::manifest::Channel;
    use crate::engine::updater::store::MemoryStagingCache;
    use crate::engine::updater::version::Version;
    use std::collections::BTreeMap;

    fn entry(path: &str, digest: &str, critical: bool) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            digest: digest.to_string(),
            size: 10,
            url: format!("https://cdn.example.com/{}", path),
            critical,
            mime_type: None,
        }
    }

    fn manifest(files: Vec<FileEntry>) -> Manifest {
        Manifest {
            version: Version::new(3, 5, 1),
            release_date: None,
            channel: Channel::Stable,
            min_version: Version::new(0, 0, 0),
            breaking: false,
            changelog: BTreeMap::new(),
            files,
            signature: None,
        }
    }

    fn engine() -> DeltaEngine {
        DeltaEngine::new(Arc::new(MemoryStagingCache::new()))
    }

    #[test]
    fn test_changed_and_new_files_selected() {
        let m = manifest(vec![
            entry("js/app.bundle.js", "sha256-new", true),
            entry("index.html", "sha256-same", false),
            entry("css/new.css", "sha256-added", false),
        ]);
        let mut applied = AppliedState::initial(Version::new(3, 5, 0));
        applied.file_digests.insert("js/app.bundle.js".into(), "sha256-old".into());
        applied.file_digests.insert("index.html".into(), "SHA256-SAME".into());
        applied.file_digests.insert("removed.js".into(), "sha256-gone".into());

        let delta = engine().compute_delta(&m, &applied);
        let paths: Vec<&str> = delta.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["js/app.bundle.js", "css/new.css"]);
    }

    #[test]
    fn test_delta_is_idempotent() {
        let m = manifest(vec![entry("a.js", "sha256-1", false), entry("b.js", "sha256-2", false)]);
        let applied = AppliedState::initial(Version::new(1, 0, 0));
        let engine = engine();
        assert_eq!(engine.compute_delta(&m, &applied), engine.compute_delta(&m, &applied));
    }

    #[test]
    fn test_delta_empty_after_install() {
        let m = manifest(vec![entry("a.js", "sha256-1", true), entry("b.js", "sha256-2", false)]);
        let mut applied = AppliedState::initial(Version::new(1, 0, 0));
        let engine = engine();
        let delta = engine.compute_delta(&m, &applied);
        applied.record_install(m.version, &delta);
        assert!(engine.compute_delta(&m, &applied).is_empty());
    }

    #[test]
    fn test_install_order_critical_first() {
        let delta = vec![
            entry("a.css", "sha256-1", false),
            entry("index.html", "sha256-2", true),
            entry("b.css", "sha256-3", false),
            entry("sw.js", "sha256-4", true),
        ];
        let order: Vec<&str> = install_order(&delta).iter().map(|f| f.path.as_str()).collect();
        assert_eq!(order, vec!["index.html", "sw.js", "a.css", "b.css"]);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let staging = Arc::new(MemoryStagingCache::new());
        staging.put("a.js", b"x").await.unwrap();
        let engine = DeltaEngine::new(staging.clone());
        engine.clear_cache().await.unwrap();
        assert!(staging.paths().await.unwrap().is_empty());
    }
}
