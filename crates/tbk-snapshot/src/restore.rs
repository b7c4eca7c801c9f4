//! RestoreEngine: verified restore of a snapshot into a directory
//!
//! The manifest signature is checked before any chunk is fetched, and a DEK
//! that will not unwrap stops the restore outright. After that, failures are
//! per file: a file whose chunks are missing, tampered, or do not hash back
//! to the recorded content is reported and the rest continue. A file only
//! appears at its destination once every byte has been verified; it is
//! assembled in a temp file next to the target and renamed into place.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use futures::{stream, StreamExt};
use tbk_chunks::ChunkId;
use tbk_core::config::EngineConfig;
use tbk_core::{Diff, Profile, VaultError, VaultResult};
use tbk_crypto::DataKey;
use tbk_storage::{Layout, RemoteStore};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::builder::ManifestBuilder;
use crate::catalog::Catalog;
use crate::chunk_store::{open_chunk, ChunkStore};
use crate::hooks::HookSet;
use crate::manifest::{ChunkRef, ManifestEntry};
use crate::session::UnlockedVault;
use crate::snapshot::{join_error, ProgressFn};

/// Chunks fetched ahead while a file is being assembled
const CHUNK_PREFETCH: usize = 4;

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Replace files that already exist at the destination
    pub overwrite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub snapshot_id: String,
    pub restored: Vec<String>,
    pub failed: Vec<FailedFile>,
    pub bytes_written: u64,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Key material needed to open the chunks of one snapshot
struct SnapshotKeys {
    chunk_keys: BTreeMap<ChunkId, String>,
    deks: BTreeMap<String, DataKey>,
}

pub struct RestoreEngine<S> {
    profile: String,
    exclude_patterns: Vec<String>,
    keys: Arc<UnlockedVault>,
    chunks: ChunkStore<S>,
    catalog: Catalog<S>,
    engine: EngineConfig,
    hooks: HookSet,
    progress: Option<ProgressFn>,
}

impl<S: RemoteStore> RestoreEngine<S> {
    pub fn new(profile: &Profile, store: S, keys: Arc<UnlockedVault>) -> Self {
        let layout = Layout::new(&profile.remote.prefix);
        Self {
            profile: profile.name.clone(),
            exclude_patterns: profile.exclude_patterns.clone(),
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

    /// Restore `snapshot_id` into `target`, creating it if needed.
    pub async fn restore(
        &self,
        snapshot_id: &str,
        target: &Path,
        options: RestoreOptions,
    ) -> VaultResult<RestoreReport> {
        self.hooks.before_restore(&self.profile, snapshot_id);
        let result = self.run(snapshot_id, target, options).await;
        match &result {
            Ok(report) => self.hooks.after_restore(&self.profile, snapshot_id, report),
            Err(e) => {
                error!(profile = %self.profile, snapshot_id, error = %e, "restore failed");
                self.hooks.failure(&self.profile, "restore", e);
            }
        }
        result
    }

    async fn run(
        &self,
        snapshot_id: &str,
        target: &Path,
        options: RestoreOptions,
    ) -> VaultResult<RestoreReport> {
        info!(profile = %self.profile, snapshot_id, target = %target.display(), "restore started");

        // Verified before anything else is fetched
        let manifest = self.catalog.fetch(snapshot_id).await?;
        let contents = manifest.open(self.keys.master())?;

        let needed: BTreeSet<&String> = contents.chunk_keys.values().collect();
        let mut deks = BTreeMap::new();
        for key_id in needed {
            deks.insert(key_id.clone(), manifest.unwrap_key(self.keys.master(), key_id)?);
        }
        let keys = SnapshotKeys {
            chunk_keys: contents.chunk_keys,
            deks,
        };

        tokio::fs::create_dir_all(target).await?;

        let total = contents.entries.len() as u64;
        let mut report = RestoreReport {
            snapshot_id: snapshot_id.to_string(),
            ..Default::default()
        };
        let keys = &keys;
        let mut results = stream::iter(contents.entries.iter())
            .map(|entry| async move {
                let result = self.restore_file(entry, target, keys, options).await;
                (entry, result)
            })
            .buffer_unordered(self.engine.effective_concurrency());

        let mut done = 0u64;
        while let Some((entry, result)) = results.next().await {
            done += 1;
            match result {
                Ok(bytes) => {
                    debug!(path = %entry.path, bytes, "file restored");
                    report.bytes_written += bytes;
                    report.restored.push(entry.path.clone());
                }
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "file not restored");
                    report.failed.push(FailedFile {
                        path: entry.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
            if let Some(cb) = &self.progress {
                cb(done, total, &entry.path);
            }
        }
        drop(results);

        report.restored.sort();
        report.failed.sort_by(|a, b| a.path.cmp(&b.path));
        info!(
            profile = %self.profile,
            snapshot_id,
            restored = report.restored.len(),
            failed = report.failed.len(),
            bytes = report.bytes_written,
            "restore finished"
        );
        Ok(report)
    }

    async fn fetch_chunk(&self, chunk: &ChunkRef, keys: &SnapshotKeys) -> VaultResult<Vec<u8>> {
        let dek = keys
            .chunk_keys
            .get(&chunk.id)
            .and_then(|key_id| keys.deks.get(key_id))
            .ok_or_else(|| VaultError::Integrity(format!("no key recorded for chunk {}", chunk.id)))?;
        let sealed = self.chunks.get(&chunk.id).await?;
        let plaintext = open_chunk(dek, &chunk.id, &sealed, self.keys.hasher())?;
        if plaintext.len() != chunk.size as usize {
            return Err(VaultError::Integrity(format!("chunk {} length", chunk.id)));
        }
        Ok(plaintext)
    }

    async fn restore_file(
        &self,
        entry: &ManifestEntry,
        target: &Path,
        keys: &SnapshotKeys,
        options: RestoreOptions,
    ) -> VaultResult<u64> {
        let dest = safe_join(target, &entry.path)?;
        if !options.overwrite && tokio::fs::try_exists(&dest).await? {
            return Err(VaultError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists (use overwrite to replace it)", dest.display()),
            )));
        }
        let parent = dest
            .parent()
            .ok_or_else(|| VaultError::PathTraversal(entry.path.clone()))?;
        tokio::fs::create_dir_all(parent).await?;

        let parent = parent.to_path_buf();
        let tmp = tokio::task::spawn_blocking(move || tempfile::NamedTempFile::new_in(parent))
            .await
            .map_err(join_error)??;
        // Dropping the temp path without persist() deletes the file, also
        // when this future is cancelled mid-write
        let (file, temp_path) = tmp.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut hasher = blake3::Hasher::new();
        let mut written = 0u64;

        let mut chunks = stream::iter(entry.chunks.iter())
            .map(|chunk| self.fetch_chunk(chunk, keys))
            .buffered(CHUNK_PREFETCH);
        while let Some(plaintext) = chunks.next().await {
            let plaintext = plaintext?;
            hasher.update(&plaintext);
            file.write_all(&plaintext).await?;
            written += plaintext.len() as u64;
        }

        if written != entry.size || hasher.finalize().to_hex().as_str() != entry.content_hash {
            return Err(VaultError::Integrity(entry.path.clone()));
        }

        file.flush().await?;
        file.sync_all().await?;
        let file = file.into_std().await;
        let (mode, mtime) = (entry.mode, entry.mtime);
        tokio::task::spawn_blocking(move || {
            apply_metadata(&file, mode, mtime)?;
            drop(file);
            temp_path
                .persist(&dest)
                .map_err(|e| VaultError::Io(e.error))
        })
        .await
        .map_err(join_error)??;
        Ok(written)
    }

    /// Compare snapshot `snapshot_id` against the current contents of
    /// `local_dir`: `added` are local files the snapshot lacks, `removed`
    /// are snapshot files missing locally.
    pub async fn diff(&self, snapshot_id: &str, local_dir: &Path) -> VaultResult<Diff> {
        let manifest = self.catalog.fetch(snapshot_id).await?;
        let entries = manifest.open(self.keys.master())?.entries;

        let hasher = self.keys.hasher().clone();
        let root = local_dir.to_path_buf();
        let excludes = self.exclude_patterns.clone();
        let build = tokio::task::spawn_blocking(move || {
            ManifestBuilder::new(&hasher, &excludes)?.build(&root, Some(&entries))
        })
        .await
        .map_err(join_error)??;
        Ok(build.diff)
    }
}

/// Join a manifest path onto `root`, refusing anything but plain relative
/// components.
pub fn safe_join(root: &Path, rel: &str) -> VaultResult<PathBuf> {
    let mut out = root.to_path_buf();
    let mut depth = 0;
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            _ => return Err(VaultError::PathTraversal(rel.to_string())),
        }
    }
    if depth == 0 {
        return Err(VaultError::PathTraversal(rel.to_string()));
    }
    Ok(out)
}

fn apply_metadata(file: &std::fs::File, mode: u32, mtime: i64) -> VaultResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(mode & 0o7777))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    if let Ok(secs) = u64::try_from(mtime) {
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))?;
    }
    Ok(())
}

impl<S> std::fmt::Debug for RestoreEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreEngine")
            .field("profile", &self.profile)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_join_accepts_relative() {
        let root = Path::new("/restore");
        assert_eq!(
            safe_join(root, "a/b/c.txt").unwrap(),
            PathBuf::from("/restore/a/b/c.txt")
        );
    }

    #[test]
    fn test_safe_join_rejects_escapes() {
        let root = Path::new("/restore");
        for bad in ["../etc/passwd", "a/../../b", "/etc/passwd", "", ".", "./a"] {
            assert!(
                matches!(safe_join(root, bad), Err(VaultError::PathTraversal(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
