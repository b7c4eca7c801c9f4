//! SnapshotEngine: incremental, signed snapshots of one profile
//!
//! Phases, each logged on entry:
//!
//! ```text
//! Building → Diffing → Encrypting → Signing → Uploading → Committed
//!     └──────────┴──────────┴──────────┴──────────┴──→ Failed
//! ```
//!
//! Chunk uploads happen during `Encrypting`. The manifest put in
//! `Uploading` is the only commit point: if any chunk fails, no manifest is
//! written and the previous snapshot stays latest.
//!
//! A chunk object is never rewritten while any manifest indexes it: a new
//! chunk that is already stored under an older snapshot's key is adopted
//! with that key. Only unreferenced leftovers of an aborted run are sealed
//! again.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{stream, StreamExt, TryStreamExt};
use tbk_chunks::ChunkId;
use tbk_core::config::EngineConfig;
use tbk_core::{unix_now, Diff, Profile, VaultError, VaultResult};
use tbk_crypto::{b64_encode, generate_data_key, wrap_dek, DataKey};
use tbk_storage::{Layout, RemoteStore};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::builder::{BuildOutput, ChunkSource, ManifestBuilder, SkippedPath};
use crate::catalog::Catalog;
use crate::chunk_store::{seal_chunk, ChunkStore};
use crate::hooks::HookSet;
use crate::lock::ProfileLock;
use crate::manifest::{
    self, ManifestBody, ManifestContents, ManifestEntry, SignedManifest, MANIFEST_VERSION,
};
use crate::session::UnlockedVault;

/// Progress callback: `(done, total, message)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPhase {
    Building,
    Diffing,
    Encrypting,
    Signing,
    Uploading,
    Committed,
    Failed,
}

impl fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Building => "building",
            Self::Diffing => "diffing",
            Self::Encrypting => "encrypting",
            Self::Signing => "signing",
            Self::Uploading => "uploading",
            Self::Committed => "committed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub snapshot_id: String,
    pub sequence: u64,
    /// Snapshot this one was diffed against
    pub previous: Option<String>,
    pub manifest_hash: String,
    pub files: usize,
    pub total_bytes: u64,
    pub diff: Diff,
    pub chunks_uploaded: usize,
    pub chunks_reused: usize,
    /// Chunks the previous snapshot referenced but the remote no longer had
    pub chunks_repaired: usize,
    /// Ciphertext bytes written for chunks
    pub bytes_uploaded: u64,
    pub skipped: Vec<SkippedPath>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub enum SnapshotOutcome {
    /// Nothing changed since `latest`; no manifest was written.
    NoChanges { latest: String },
    Committed(SnapshotReport),
}

/// One row of `list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub snapshot_id: String,
    pub sequence: u64,
    pub created_at: u64,
    pub files: usize,
    pub total_bytes: u64,
    pub previous_manifest_hash: Option<String>,
}

pub struct SnapshotEngine<S> {
    profile: String,
    source_dir: PathBuf,
    exclude_patterns: Vec<String>,
    state_dir: PathBuf,
    keys: Arc<UnlockedVault>,
    chunks: ChunkStore<S>,
    catalog: Catalog<S>,
    engine: EngineConfig,
    hooks: HookSet,
    progress: Option<ProgressFn>,
}

impl<S: RemoteStore> SnapshotEngine<S> {
    pub fn new(profile: &Profile, store: S, keys: Arc<UnlockedVault>, state_dir: &Path) -> Self {
        let layout = Layout::new(&profile.remote.prefix);
        Self {
            profile: profile.name.clone(),
            source_dir: profile.source_dir.clone(),
            exclude_patterns: profile.exclude_patterns.clone(),
            state_dir: state_dir.to_path_buf(),
            chunks: ChunkStore::new(store.clone(), layout.clone()),
            catalog: Catalog::new(store, layout, *keys.public_key()),
            keys,
            engine: EngineConfig::default(),
            hooks: HookSet::default(),
            progress: None,
        }
    }

    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn catalog(&self) -> &Catalog<S> {
        &self.catalog
    }

    /// Take a snapshot of the profile's source directory.
    pub async fn snapshot(&self) -> VaultResult<SnapshotOutcome> {
        self.hooks.before_snapshot(&self.profile);
        let mut phase = SnapshotPhase::Building;
        let result = self.run(&mut phase).await;
        match &result {
            Ok(outcome) => self.hooks.after_snapshot(&self.profile, outcome),
            Err(e) => {
                error!(profile = %self.profile, phase = %phase, error = %e, "snapshot failed");
                self.enter(&mut phase, SnapshotPhase::Failed);
                self.hooks.failure(&self.profile, "snapshot", e);
            }
        }
        result
    }

    fn enter(&self, phase: &mut SnapshotPhase, next: SnapshotPhase) {
        info!(profile = %self.profile, from = %phase, to = %next, "snapshot phase");
        *phase = next;
    }

    fn report_progress(&self, done: u64, total: u64, msg: &str) {
        if let Some(cb) = &self.progress {
            cb(done, total, msg);
        }
    }

    async fn run(&self, phase: &mut SnapshotPhase) -> VaultResult<SnapshotOutcome> {
        let started = Instant::now();
        let _lock = ProfileLock::acquire(&self.state_dir, &self.profile)?;
        info!(
            profile = %self.profile,
            source = %self.source_dir.display(),
            "snapshot started"
        );

        // Building: always against a freshly fetched, verified latest manifest
        self.report_progress(0, 0, "fetching latest manifest");
        let previous = self.catalog.latest().await?;
        let previous_contents = match &previous {
            Some(m) => Some(m.open(self.keys.master())?),
            None => None,
        };
        self.report_progress(0, 0, "scanning files");
        let build = self
            .build_draft(previous_contents.as_ref().map(|c| c.entries.clone()))
            .await?;

        self.enter(phase, SnapshotPhase::Diffing);
        if let Some(prev) = &previous {
            if build.diff.is_empty() {
                info!(
                    profile = %self.profile,
                    latest = prev.snapshot_id(),
                    "no changes since latest snapshot"
                );
                return Ok(SnapshotOutcome::NoChanges {
                    latest: prev.snapshot_id().to_string(),
                });
            }
        }
        info!(
            added = build.diff.added.len(),
            modified = build.diff.modified.len(),
            removed = build.diff.removed.len(),
            bytes_to_upload = build.diff.bytes_to_upload,
            "diff computed"
        );

        self.enter(phase, SnapshotPhase::Encrypting);
        let sequence = previous.as_ref().map_or(1, |m| m.body().sequence + 1);
        let created_at = unix_now();
        let snapshot_id = manifest::snapshot_id(sequence, created_at);
        let dek = generate_data_key();

        let BuildOutput {
            draft,
            diff,
            new_chunks,
            reused,
            skipped,
        } = build;
        let previous_keys = previous_contents
            .map(|c| c.chunk_keys)
            .unwrap_or_default();
        let mut known_ring = previous
            .as_ref()
            .map(|m| m.body().key_ring.clone())
            .unwrap_or_default();

        let mut chunk_keys: BTreeMap<ChunkId, String> = BTreeMap::new();
        let mut uploads: Vec<(ChunkId, ChunkSource)> = new_chunks.into_iter().collect();
        let chunks_new = uploads.len();
        let repaired = self
            .check_reused(&reused, &previous_keys, &mut chunk_keys, &mut uploads)
            .await?;
        let adopted = self
            .adopt_existing(
                &mut uploads,
                previous.as_ref().map(SignedManifest::snapshot_id),
                &mut chunk_keys,
                &mut known_ring,
            )
            .await?;
        for (id, _) in &uploads {
            chunk_keys.insert(*id, snapshot_id.clone());
        }
        let chunks_uploaded = uploads.len();
        let bytes_uploaded = self.upload_chunks(uploads, &dek).await?;

        // Signing: only reached once every chunk upload succeeded
        self.enter(phase, SnapshotPhase::Signing);
        let key_ring = self.key_ring(&snapshot_id, &dek, &chunk_keys, &known_ring)?;
        let files = draft.entries().len();
        let total_bytes = draft.total_size();
        let contents = ManifestContents {
            entries: draft.into_entries(),
            chunk_keys,
        };
        let body = ManifestBody {
            version: MANIFEST_VERSION,
            snapshot_id: snapshot_id.clone(),
            sequence,
            created_at,
            previous_manifest_hash: previous.as_ref().map(SignedManifest::hash),
            public_key: self.keys.public_key().to_base64(),
            key_ring,
            contents: contents.seal(&dek, &snapshot_id)?,
        };
        let signed = SignedManifest::sign(body, self.keys.signing())?;

        self.enter(phase, SnapshotPhase::Uploading);
        self.report_progress(0, 0, "committing manifest");
        self.catalog.commit(&signed).await?;

        self.enter(phase, SnapshotPhase::Committed);
        let report = SnapshotReport {
            snapshot_id,
            sequence,
            previous: previous.as_ref().map(|m| m.snapshot_id().to_string()),
            manifest_hash: signed.hash(),
            files,
            total_bytes,
            diff,
            chunks_uploaded,
            chunks_reused: reused.len() - repaired + adopted,
            chunks_repaired: repaired,
            bytes_uploaded,
            skipped,
            duration: started.elapsed(),
        };
        info!(
            profile = %self.profile,
            snapshot_id = %report.snapshot_id,
            files = report.files,
            new_chunks = chunks_new,
            reused = report.chunks_reused,
            repaired = report.chunks_repaired,
            bytes = report.bytes_uploaded,
            elapsed_ms = report.duration.as_millis() as u64,
            "snapshot committed"
        );
        Ok(SnapshotOutcome::Committed(report))
    }

    async fn build_draft(&self, previous: Option<Vec<ManifestEntry>>) -> VaultResult<BuildOutput> {
        let hasher = self.keys.hasher().clone();
        let root = self.source_dir.clone();
        let excludes = self.exclude_patterns.clone();
        tokio::task::spawn_blocking(move || {
            ManifestBuilder::new(&hasher, &excludes)?.build(&root, previous.as_deref())
        })
        .await
        .map_err(join_error)?
    }

    /// Confirm every reused chunk is still present. Present ones keep the
    /// key they were sealed with; missing ones join `uploads`. Returns how
    /// many went missing.
    async fn check_reused(
        &self,
        reused: &BTreeMap<ChunkId, ChunkSource>,
        previous_keys: &BTreeMap<ChunkId, String>,
        chunk_keys: &mut BTreeMap<ChunkId, String>,
        uploads: &mut Vec<(ChunkId, ChunkSource)>,
    ) -> VaultResult<usize> {
        let chunks = &self.chunks;
        let checks: Vec<(&ChunkId, &ChunkSource, bool)> = stream::iter(reused.iter())
            .map(|(id, source)| async move {
                let present = chunks.exists(id).await?;
                Ok::<_, VaultError>((id, source, present))
            })
            .buffer_unordered(self.engine.effective_concurrency())
            .try_collect()
            .await?;

        let mut repaired = 0;
        for (id, source, present) in checks {
            match previous_keys.get(id) {
                Some(key_id) if present => {
                    chunk_keys.insert(*id, key_id.clone());
                }
                _ => {
                    warn!(chunk = %id, "reused chunk missing from remote, uploading again");
                    uploads.push((*id, source.clone()));
                    repaired += 1;
                }
            }
        }
        Ok(repaired)
    }

    /// Drop from `uploads` every chunk that is already stored and indexed by
    /// some committed manifest, taking over the key it was sealed with.
    /// Manifests are searched newest first; `skip` is the one the reuse check
    /// already covered. Stored chunks no manifest indexes stay in `uploads`.
    /// Returns how many were adopted.
    async fn adopt_existing(
        &self,
        uploads: &mut Vec<(ChunkId, ChunkSource)>,
        skip: Option<&str>,
        chunk_keys: &mut BTreeMap<ChunkId, String>,
        known_ring: &mut BTreeMap<String, String>,
    ) -> VaultResult<usize> {
        let chunks = &self.chunks;
        let checks: Vec<(ChunkId, bool)> = stream::iter(uploads.iter().map(|(id, _)| *id))
            .map(|id| async move { Ok::<_, VaultError>((id, chunks.exists(&id).await?)) })
            .buffer_unordered(self.engine.effective_concurrency())
            .try_collect()
            .await?;
        let mut stored: BTreeSet<ChunkId> = checks
            .into_iter()
            .filter_map(|(id, present)| present.then_some(id))
            .collect();
        if stored.is_empty() {
            return Ok(0);
        }

        for id in self.catalog.list_ids().await?.into_iter().rev() {
            if stored.is_empty() {
                break;
            }
            if skip == Some(id.as_str()) {
                continue;
            }
            let manifest = self.catalog.fetch(&id).await?;
            let contents = manifest.open(self.keys.master())?;
            stored.retain(|chunk| {
                let Some(key_id) = contents.chunk_keys.get(chunk) else {
                    return true;
                };
                let Some(wrapped) = manifest.body().key_ring.get(key_id) else {
                    return true;
                };
                known_ring.insert(key_id.clone(), wrapped.clone());
                chunk_keys.insert(*chunk, key_id.clone());
                debug!(chunk = %chunk, snapshot_id = %id, "adopting stored chunk");
                false
            });
        }
        for chunk in &stored {
            debug!(chunk = %chunk, "stored chunk is unreferenced, sealing it again");
        }

        let before = uploads.len();
        uploads.retain(|(id, _)| !chunk_keys.contains_key(id));
        Ok(before - uploads.len())
    }

    /// Re-read, verify, seal and upload chunks on bounded worker tasks.
    /// Returns the ciphertext bytes written. The first failure aborts every
    /// task still in flight.
    async fn upload_chunks(
        &self,
        uploads: Vec<(ChunkId, ChunkSource)>,
        dek: &DataKey,
    ) -> VaultResult<u64> {
        let total = uploads.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.engine.effective_concurrency()));
        let dek = Arc::new(dek.clone());
        let mut tasks: JoinSet<VaultResult<u64>> = JoinSet::new();
        let mut done = 0u64;
        let mut bytes = 0u64;

        for (id, source) in uploads {
            while let Some(finished) = tasks.try_join_next() {
                bytes += finished.map_err(join_error)??;
                done += 1;
                self.report_progress(done, total, "uploading chunks");
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| VaultError::Other(anyhow::anyhow!("upload semaphore closed: {e}")))?;
            let chunks = self.chunks.clone();
            let keys = self.keys.clone();
            let dek = dek.clone();
            let compress = self.engine.compress && source.compress;
            let level = self.engine.compression_level;

            tasks.spawn(async move {
                let _permit = permit;
                let plaintext = read_chunk(&source).await?;
                if keys.hasher().id(&plaintext) != id {
                    return Err(VaultError::SourceChanged(source.path.display().to_string()));
                }
                let sealed = seal_chunk(&dek, &id, &plaintext, compress, level)?;
                let len = sealed.len() as u64;
                chunks.put(&id, sealed).await?;
                debug!(chunk = %id, bytes = len, "chunk uploaded");
                Ok(len)
            });
        }

        while let Some(finished) = tasks.join_next().await {
            bytes += finished.map_err(join_error)??;
            done += 1;
            self.report_progress(done, total, "uploading chunks");
        }
        Ok(bytes)
    }

    /// Wrapped DEKs for every key id the chunk index mentions, this
    /// snapshot's own DEK included. Older keys come from `known`.
    fn key_ring(
        &self,
        snapshot_id: &str,
        dek: &DataKey,
        chunk_keys: &BTreeMap<ChunkId, String>,
        known: &BTreeMap<String, String>,
    ) -> VaultResult<BTreeMap<String, String>> {
        let mut ring = BTreeMap::new();
        let needed: BTreeSet<&String> = chunk_keys.values().collect();
        for key_id in needed {
            if key_id == snapshot_id {
                continue;
            }
            let wrapped = known.get(key_id).ok_or_else(|| {
                VaultError::Integrity(format!("no wrapped key for snapshot {key_id}"))
            })?;
            ring.insert(key_id.clone(), wrapped.clone());
        }
        let own = wrap_dek(self.keys.master(), dek, snapshot_id)?;
        ring.insert(snapshot_id.to_string(), b64_encode(&own));
        Ok(ring)
    }

    /// Every snapshot of the profile, oldest first. Each manifest is
    /// verified and opened.
    pub async fn list(&self) -> VaultResult<Vec<SnapshotSummary>> {
        let mut out = Vec::new();
        for id in self.catalog.list_ids().await? {
            let manifest = self.catalog.fetch(&id).await?;
            let contents = manifest.open(self.keys.master())?;
            let body = manifest.body();
            out.push(SnapshotSummary {
                snapshot_id: id,
                sequence: body.sequence,
                created_at: body.created_at,
                files: contents.entries.len(),
                total_bytes: contents.entries.iter().map(|e| e.size).sum(),
                previous_manifest_hash: body.previous_manifest_hash.clone(),
            });
        }
        Ok(out)
    }

    /// Remove one snapshot's manifest. Chunks stay: later snapshots may
    /// reference them, and their key ring keeps the DEKs they need.
    pub async fn delete_snapshot(&self, snapshot_id: &str) -> VaultResult<()> {
        let _lock = ProfileLock::acquire(&self.state_dir, &self.profile)?;
        self.catalog.delete(snapshot_id).await?;
        info!(profile = %self.profile, snapshot_id, "snapshot deleted");
        Ok(())
    }
}

pub(crate) fn join_error(e: JoinError) -> VaultError {
    VaultError::Other(anyhow::anyhow!("worker task failed: {e}"))
}

/// Read one chunk back from its source file. A file that vanished or
/// shrank since the build is [`VaultError::SourceChanged`].
async fn read_chunk(source: &ChunkSource) -> VaultResult<Vec<u8>> {
    let changed = || VaultError::SourceChanged(source.path.display().to_string());
    let mut file = match tokio::fs::File::open(&source.path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(changed()),
        Err(e) => return Err(e.into()),
    };
    file.seek(SeekFrom::Start(source.offset)).await?;
    let mut buf = vec![0u8; source.length];
    match file.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(changed()),
        Err(e) => Err(e.into()),
    }
}

impl<S> fmt::Debug for SnapshotEngine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotEngine")
            .field("profile", &self.profile)
            .field("source_dir", &self.source_dir)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(path: PathBuf, offset: u64, length: usize) -> ChunkSource {
        ChunkSource {
            path,
            offset,
            length,
            compress: false,
        }
    }

    #[tokio::test]
    async fn test_read_chunk_reads_the_recorded_range() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let bytes = read_chunk(&source(path, 3, 4)).await.unwrap();
        assert_eq!(bytes, b"3456");
    }

    #[tokio::test]
    async fn test_read_chunk_detects_shrunk_or_missing_source() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f.txt");
        std::fs::write(&path, b"short").unwrap();

        let err = read_chunk(&source(path.clone(), 2, 10)).await.unwrap_err();
        assert!(matches!(err, VaultError::SourceChanged(_)));

        std::fs::remove_file(&path).unwrap();
        let err = read_chunk(&source(path, 0, 1)).await.unwrap_err();
        assert!(matches!(err, VaultError::SourceChanged(_)));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SnapshotPhase::Encrypting.to_string(), "encrypting");
        assert_eq!(SnapshotPhase::Failed.to_string(), "failed");
    }
}
