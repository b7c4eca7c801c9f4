//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use secrecy::SecretString;
use tbk_core::config::{EngineConfig, PasswordPolicy};
use tbk_core::profile::{RemoteBackend, RemoteConfig, SecretBackendKind};
use tbk_core::{KdfParams, Profile, VaultError, VaultResult};
use tbk_crypto::{KeyVault, MasterKey};
use tbk_snapshot::{RestoreEngine, SnapshotEngine, SnapshotOutcome, SnapshotReport, UnlockedVault};
use tbk_storage::{OpendalStore, RemoteStore};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const PASSWORD: &str = "correct horse Battery 9";

pub struct Fixture {
    pub tmp: TempDir,
    pub profile: Profile,
    pub vault: KeyVault,
    pub phrase: SecretString,
    pub keys: Arc<UnlockedVault>,
    pub store: OpendalStore,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();

        let init = KeyVault::initialize(
            &SecretString::from(PASSWORD),
            &KdfParams::MINIMUM,
            &PasswordPolicy::default(),
        )
        .unwrap();
        let keys = Arc::new(UnlockedVault::open(&init.vault, init.master).unwrap());

        let profile = Profile {
            name: "docs".into(),
            source_dir: source,
            remote: RemoteConfig {
                backend: RemoteBackend::Memory,
                endpoint: None,
                region: None,
                bucket: None,
                root: None,
                prefix: "docs".into(),
                access_key_id: None,
            },
            exclude_patterns: vec![],
            created_at: 0,
            secret_backend: SecretBackendKind::EncryptedFile,
            keys: init.vault.keys().clone(),
        };

        Self {
            tmp,
            profile,
            vault: init.vault,
            phrase: init.phrase,
            keys,
            store: OpendalStore::memory().unwrap(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.profile.source_dir
    }

    pub fn state_dir(&self) -> PathBuf {
        self.tmp.path().join("state")
    }

    pub fn target(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }

    pub fn write(&self, rel: &str, content: &[u8]) {
        let path = self.source().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn engine_with<S: RemoteStore>(&self, store: S) -> SnapshotEngine<S> {
        SnapshotEngine::new(&self.profile, store, self.keys.clone(), &self.state_dir())
            .with_engine_config(test_engine())
    }

    pub fn engine(&self) -> SnapshotEngine<OpendalStore> {
        self.engine_with(self.store.clone())
    }

    pub fn restorer_with<S: RemoteStore>(&self, store: S) -> RestoreEngine<S> {
        RestoreEngine::new(&self.profile, store, self.keys.clone()).with_engine_config(test_engine())
    }

    pub fn restorer(&self) -> RestoreEngine<OpendalStore> {
        self.restorer_with(self.store.clone())
    }

    pub fn master(&self) -> &MasterKey {
        self.keys.master()
    }
}

pub fn test_engine() -> EngineConfig {
    EngineConfig {
        concurrency: 4,
        ..Default::default()
    }
}

pub fn committed(outcome: SnapshotOutcome) -> SnapshotReport {
    match outcome {
        SnapshotOutcome::Committed(report) => report,
        SnapshotOutcome::NoChanges { latest } => {
            panic!("expected a new snapshot, got no changes since {latest}")
        }
    }
}

/// Assert two directory trees hold the same files with the same bytes.
pub fn assert_same_tree(expected: &Path, actual: &Path) {
    let mut want = Vec::new();
    walk(expected, expected, &mut want);
    let mut got = Vec::new();
    walk(actual, actual, &mut got);
    assert_eq!(want, got);
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk(root, &path, out);
        } else {
            let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
            out.push((rel, std::fs::read(&path).unwrap()));
        }
    }
}

/// Counts reads of chunk blobs
#[derive(Clone)]
pub struct CountingStore {
    pub inner: OpendalStore,
    pub chunk_gets: Arc<AtomicU32>,
}

impl CountingStore {
    pub fn new(inner: OpendalStore) -> Self {
        Self {
            inner,
            chunk_gets: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn chunk_gets(&self) -> u32 {
        self.chunk_gets.load(Ordering::SeqCst)
    }
}

impl RemoteStore for CountingStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()> {
        self.inner.put(key, bytes).await
    }
    async fn get(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        if key.contains("/chunks/") {
            self.chunk_gets.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.get(key).await
    }
    async fn exists(&self, key: &str) -> VaultResult<bool> {
        self.inner.exists(key).await
    }
    async fn list(&self, dir: &str) -> VaultResult<Vec<String>> {
        self.inner.list(dir).await
    }
    async fn delete(&self, key: &str) -> VaultResult<()> {
        self.inner.delete(key).await
    }
}

/// Lets the first `allowed` chunk puts through, then fails every chunk put
/// the way a retrying store reports an upload it gave up on. Manifest puts
/// always succeed.
#[derive(Clone)]
pub struct FailingStore {
    pub inner: OpendalStore,
    pub allowed: u32,
    pub chunk_puts: Arc<AtomicU32>,
}

impl FailingStore {
    pub fn new(inner: OpendalStore, allowed: u32) -> Self {
        Self {
            inner,
            allowed,
            chunk_puts: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl RemoteStore for FailingStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()> {
        if key.contains("/chunks/") {
            let n = self.chunk_puts.fetch_add(1, Ordering::SeqCst);
            if n >= self.allowed {
                return Err(VaultError::UploadFailed {
                    key: key.to_string(),
                    attempts: 3,
                    reason: "503 service unavailable".into(),
                });
            }
        }
        self.inner.put(key, bytes).await
    }
    async fn get(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }
    async fn exists(&self, key: &str) -> VaultResult<bool> {
        self.inner.exists(key).await
    }
    async fn list(&self, dir: &str) -> VaultResult<Vec<String>> {
        self.inner.list(dir).await
    }
    async fn delete(&self, key: &str) -> VaultResult<()> {
        self.inner.delete(key).await
    }
}

/// Lets the first `allowed` chunk puts (or gets) through, then parks every
/// later one forever. `entered` fires once a call has parked.
#[derive(Clone)]
pub struct GatedStore {
    pub inner: OpendalStore,
    pub gate_puts: bool,
    pub allowed: u32,
    pub seen: Arc<AtomicU32>,
    pub entered: Arc<Notify>,
}

impl GatedStore {
    pub fn puts(inner: OpendalStore, allowed: u32) -> Self {
        Self::new(inner, true, allowed)
    }

    pub fn gets(inner: OpendalStore, allowed: u32) -> Self {
        Self::new(inner, false, allowed)
    }

    fn new(inner: OpendalStore, gate_puts: bool, allowed: u32) -> Self {
        Self {
            inner,
            gate_puts,
            allowed,
            seen: Arc::new(AtomicU32::new(0)),
            entered: Arc::new(Notify::new()),
        }
    }

    async fn gate(&self, key: &str) {
        if key.contains("/chunks/") && self.seen.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            self.entered.notify_one();
            std::future::pending::<()>().await;
        }
    }
}

impl RemoteStore for GatedStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()> {
        if self.gate_puts {
            self.gate(key).await;
        }
        self.inner.put(key, bytes).await
    }
    async fn get(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        if !self.gate_puts {
            self.gate(key).await;
        }
        self.inner.get(key).await
    }
    async fn exists(&self, key: &str) -> VaultResult<bool> {
        self.inner.exists(key).await
    }
    async fn list(&self, dir: &str) -> VaultResult<Vec<String>> {
        self.inner.list(dir).await
    }
    async fn delete(&self, key: &str) -> VaultResult<()> {
        self.inner.delete(key).await
    }
}
