#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use updatekit_lib::engine::config::UpdaterConfig;
use updatekit_lib::engine::updater::canonical::signed_payload;
use updatekit_lib::engine::updater::digest::ContentDigest;
use updatekit_lib::engine::updater::{
    AppliedState, Collaborators, FixedLocale, Installer, KeyValueStore, MemoryStagingCache,
    MemoryStore, Notifier, Result, Transport, UpdateError, UpdateEvent, UpdateManager, Version,
};
use std::collections::HashSet;

pub const MANIFEST_URL: &str = "https://updates.example.com/manifest.json";

pub fn file_url(path: &str) -> String {
    format!("https://cdn.example.com/{}", path)
}

pub fn digest_of(bytes: &[u8]) -> String {
    ContentDigest::sha256(bytes).to_string()
}

enum Route {
    Body(Vec<u8>),
    Status(u16),
}

/// Serves canned responses; query strings are ignored when routing
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Body(body.into()));
    }

    pub fn fail(&self, url: &str, status: u16) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Status(status));
    }

    /// Hold requests for `url` until the returned handle is notified
    pub fn gate(&self, url: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(url.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str, on_chunk: &mut (dyn FnMut(u64) + Send)) -> Result<Vec<u8>> {
        let key = url.split('?').next().unwrap_or(url).to_string();
        self.calls.lock().unwrap().push(key.clone());

        let gate = self.gates.lock().unwrap().get(&key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let route = match self.routes.lock().unwrap().get(&key) {
            Some(Route::Body(body)) => Ok(body.clone()),
            Some(Route::Status(status)) => Err(*status),
            None => Err(404),
        };
        let body = route.map_err(|status| UpdateError::Network {
            message: format!("HTTP {} from {}", status, url),
            status: Some(status),
        })?;

        // Two chunks so progress has something to report in between
        let half = body.len() / 2;
        on_chunk(half as u64);
        on_chunk((body.len() - half) as u64);
        Ok(body)
    }
}

/// Records installs in memory; can be told to fail on one path
#[derive(Default)]
pub struct RecordingInstaller {
    installed: Mutex<Vec<(String, Vec<u8>)>>,
    fail_on: Mutex<Option<String>>,
    reloads: AtomicUsize,
}

impl RecordingInstaller {
    pub fn fail_on(&self, path: &str) {
        *self.fail_on.lock().unwrap() = Some(path.to_string());
    }

    pub fn installed_paths(&self) -> Vec<String> {
        self.installed.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Installer for RecordingInstaller {
    async fn install(&self, path: &str, bytes: &[u8]) -> Result<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(path) {
            return Err(UpdateError::Install {
                path: path.to_string(),
                reason: "disk full".to_string(),
            });
        }
        self.installed.lock().unwrap().push((path.to_string(), bytes.to_vec()));
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Memory store that can be told to fail reads or writes of given keys
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl FaultyStore {
    pub fn fail_reads_of(&self, key: &str) {
        self.failing_reads.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_writes_to(&self, key: &str) {
        self.failing_writes.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_reads.lock().unwrap().clear();
        self.failing_writes.lock().unwrap().clear();
    }

    fn fault(&self, key: &str, failing: &Mutex<HashSet<String>>) -> Result<()> {
        if failing.lock().unwrap().contains(key) {
            return Err(UpdateError::Store(format!("I/O error on {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.fault(key, &self.failing_reads)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.fault(key, &self.failing_writes)?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.fault(key, &self.failing_writes)?;
        self.inner.delete(key).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<UpdateEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<UpdateEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name()).collect()
    }

    pub fn progress(&self) -> Vec<u8> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                UpdateEvent::DownloadProgress { percent } => Some(*percent),
                _ => None,
            })
            .collect()
    }

    pub fn error_kinds(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                UpdateEvent::Error { kind, .. } => Some(kind.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: UpdateEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

pub fn public_key_hex() -> String {
    hex::encode(signing_key().verifying_key().to_bytes())
}

/// A manifest file entry; the content is served from `file_url(path)`
pub fn file(path: &str, content: &[u8], critical: bool) -> Value {
    json!({
        "path": path,
        "hash": digest_of(content),
        "size": content.len(),
        "url": file_url(path),
        "critical": critical,
    })
}

pub fn manifest(version: &str, files: Vec<Value>) -> Value {
    json!({
        "version": version,
        "releaseDate": "2026-10-01T00:00:00Z",
        "channel": "stable",
        "minVersion": "0.0.0",
        "breaking": false,
        "changelog": {"en": format!("Release {}", version), "de": format!("Version {}", version)},
        "files": files,
        "signature": null,
    })
}

pub fn sign(mut document: Value) -> Value {
    let payload = signed_payload(&document["version"], &document["files"]).unwrap();
    let signature = signing_key().sign(&payload);
    document["signature"] = Value::String(STANDARD.encode(signature.to_bytes()));
    document
}

pub fn test_config() -> UpdaterConfig {
    let mut config = UpdaterConfig::for_manifest_url(MANIFEST_URL);
    config.public_key = Some(public_key_hex());
    config.allow_unsigned = false;
    config.auto_install = true;
    config.retry_base_delay_ms = 1000;
    config.reload_delay_ms = 0;
    config
}

/// Manager wired to in-memory fakes
pub struct Harness {
    pub manager: UpdateManager,
    pub transport: Arc<FakeTransport>,
    pub store: Arc<FaultyStore>,
    pub staging: Arc<MemoryStagingCache>,
    pub installer: Arc<RecordingInstaller>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(config: UpdaterConfig, build_version: Version) -> Self {
        let transport = Arc::new(FakeTransport::default());
        let store = Arc::new(FaultyStore::default());
        let staging = Arc::new(MemoryStagingCache::new());
        let installer = Arc::new(RecordingInstaller::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let collaborators = Collaborators {
            transport: transport.clone(),
            store: store.clone(),
            staging: staging.clone(),
            installer: installer.clone(),
            notifier: notifier.clone(),
            locale: Arc::new(FixedLocale::new("de-DE")),
        };
        let manager = UpdateManager::new(config, build_version, collaborators).unwrap();

        Self { manager, transport, store, staging, installer, notifier }
    }

    /// Publish a manifest and serve the given file contents
    pub fn publish(&self, document: &Value, contents: &[(&str, &[u8])]) {
        self.transport.serve(MANIFEST_URL, serde_json::to_vec(document).unwrap());
        for (path, content) in contents {
            self.transport.serve(&file_url(path), content.to_vec());
        }
    }

    pub async fn seed_applied(&self, version: Version, files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut state = AppliedState::initial(version);
        let digests: BTreeMap<String, String> = files
            .iter()
            .map(|(path, content)| (path.to_string(), digest_of(content)))
            .collect();
        state.file_digests = digests;
        state.save(self.store.as_ref()).await.unwrap();
        self.applied_bytes().await
    }

    pub async fn applied_bytes(&self) -> Vec<u8> {
        self.store.get("applied_state").await.unwrap().unwrap_or_default()
    }
}
