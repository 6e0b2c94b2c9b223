//! Storage Capabilities
//!
//! The engine keeps no storage of its own; it is handed a durable key-value
//! store (applied state, snapshot) and a staging cache for downloaded bytes.

use super::error::{Result, UpdateError};
use super::layout::resolve_relative;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

/// Durable key-value store surviving process restarts
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Downloaded-but-not-installed file bytes, keyed by manifest path
#[async_trait]
pub trait StagingCache: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
    async fn clear(&self) -> Result<()>;
    async fn paths(&self) -> Result<Vec<String>>;
}

/// In-memory key-value store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// In-memory staging cache
#[derive(Debug, Default)]
pub struct MemoryStagingCache {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStagingCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StagingCache for MemoryStagingCache {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        Ok(files.get(path).cloned())
    }

    async fn clear(&self) -> Result<()> {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    async fn paths(&self) -> Result<Vec<String>> {
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        Ok(files.keys().cloned().collect())
    }
}

/// Write to a temp file first, then rename (atomic)
pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    fs::write(&temp_path, content).await?;
    fs::rename(&temp_path, path).await
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(UpdateError::Store(format!("Failed to read {}: {}", path.display(), e))),
    }
}

/// One JSON file per key in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if !valid {
            return Err(UpdateError::Store(format!("Invalid store key: {}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.key_path(key)?).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.key_path(key)?;
        write_atomic(&path, value)
            .await
            .map_err(|e| UpdateError::Store(format!("Failed to write {}: {}", path.display(), e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpdateError::Store(format!("Failed to delete {}: {}", path.display(), e))),
        }
    }
}

/// Staged files mirrored under a directory
#[derive(Debug, Clone)]
pub struct FileStagingCache {
    root: PathBuf,
}

impl FileStagingCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        resolve_relative(&self.root, path).map_err(|e| UpdateError::Store(e.to_string()))
    }
}

#[async_trait]
impl StagingCache for FileStagingCache {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        write_atomic(&target, bytes)
            .await
            .map_err(|e| UpdateError::Store(format!("Failed to stage {}: {}", path, e)))
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.resolve(path)?).await
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(UpdateError::Store(format!("Failed to clear staging: {}", e))),
        }
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn paths(&self) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "tmp") {
                    continue;
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let parts: Vec<String> = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    found.push(parts.join("/"));
                }
            }
        }

        found.sort();
        Ok(found)
    }
}
