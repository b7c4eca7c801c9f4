//! ManifestBuilder: walk a source tree, chunk every regular file, and diff
//! the result against the previous snapshot.
//!
//! Files are read and chunked in parallel on the rayon pool. Chunk bytes are
//! not kept; each chunk remembers where it came from so the upload phase
//! can re-read and re-verify it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use rayon::prelude::*;
use tbk_chunks::{hash_bytes, hash_to_hex, should_compress, split, ChunkHasher, ChunkId, ChunkSizes};
use tbk_core::{Diff, VaultError, VaultResult};
use tracing::{debug, warn};

use crate::manifest::{ChunkRef, ManifestDraft, ManifestEntry};

/// A path the build left out, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPath {
    pub path: String,
    pub reason: String,
}

/// Where to re-read a chunk from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSource {
    pub path: PathBuf,
    pub offset: u64,
    pub length: usize,
    pub compress: bool,
}

#[derive(Debug)]
pub struct BuildOutput {
    pub draft: ManifestDraft,
    pub diff: Diff,
    /// Chunks the previous snapshot does not reference
    pub new_chunks: BTreeMap<ChunkId, ChunkSource>,
    /// Chunks the previous snapshot already references
    pub reused: BTreeMap<ChunkId, ChunkSource>,
    pub skipped: Vec<SkippedPath>,
}

struct SourceFile {
    abs: PathBuf,
    rel: String,
}

struct ScannedFile {
    entry: ManifestEntry,
    sources: Vec<(ChunkId, ChunkSource)>,
}

pub struct ManifestBuilder<'a> {
    hasher: &'a ChunkHasher,
    excludes: Vec<glob::Pattern>,
}

impl<'a> ManifestBuilder<'a> {
    /// `exclude_patterns` are globs matched against each file or directory
    /// name and against its path relative to the root.
    pub fn new(hasher: &'a ChunkHasher, exclude_patterns: &[String]) -> VaultResult<Self> {
        let excludes = exclude_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| VaultError::Config(format!("invalid exclude pattern '{p}': {e}")))
            })
            .collect::<VaultResult<Vec<_>>>()?;
        Ok(Self { hasher, excludes })
    }

    /// Build a draft of `root` and classify its chunks against `previous`.
    pub fn build(&self, root: &Path, previous: Option<&[ManifestEntry]>) -> VaultResult<BuildOutput> {
        if !root.is_dir() {
            return Err(VaultError::Config(format!(
                "source directory {} does not exist or is not a directory",
                root.display()
            )));
        }

        let mut files = Vec::new();
        let mut skipped = Vec::new();
        self.collect(root, "", &mut files, &mut skipped)?;

        let scanned: Vec<Result<ScannedFile, SkippedPath>> =
            files.par_iter().map(|f| self.scan_file(f)).collect();

        let previous_chunks: BTreeSet<ChunkId> = previous
            .unwrap_or_default()
            .iter()
            .flat_map(|e| e.chunks.iter().map(|c| c.id))
            .collect();

        let mut entries = Vec::with_capacity(scanned.len());
        let mut new_chunks = BTreeMap::new();
        let mut reused = BTreeMap::new();
        for result in scanned {
            match result {
                Ok(file) => {
                    for (id, source) in file.sources {
                        let bucket = if previous_chunks.contains(&id) {
                            &mut reused
                        } else {
                            &mut new_chunks
                        };
                        bucket.entry(id).or_insert(source);
                    }
                    entries.push(file.entry);
                }
                Err(skip) => {
                    warn!(path = %skip.path, reason = %skip.reason, "skipping file");
                    skipped.push(skip);
                }
            }
        }

        let draft = ManifestDraft::new(entries);
        let mut diff = compute_diff(previous.unwrap_or_default(), draft.entries());
        diff.bytes_to_upload = new_chunks.values().map(|s| s.length as u64).sum();
        skipped.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(
            files = draft.entries().len(),
            new_chunks = new_chunks.len(),
            reused = reused.len(),
            skipped = skipped.len(),
            "manifest draft built"
        );
        Ok(BuildOutput {
            draft,
            diff,
            new_chunks,
            reused,
            skipped,
        })
    }

    fn is_excluded(&self, name: &str, rel: &str) -> bool {
        self.excludes
            .iter()
            .any(|p| p.matches(name) || p.matches(rel))
    }

    fn collect(
        &self,
        dir: &Path,
        prefix: &str,
        out: &mut Vec<SourceFile>,
        skipped: &mut Vec<SkippedPath>,
    ) -> VaultResult<()> {
        let read_dir = match std::fs::read_dir(dir) {
            Ok(rd) => rd,
            // the root itself must be readable
            Err(e) if prefix.is_empty() => return Err(e.into()),
            Err(e) => {
                warn!(path = prefix, error = %e, "skipping unreadable directory");
                skipped.push(SkippedPath {
                    path: prefix.to_string(),
                    reason: format!("unreadable directory: {e}"),
                });
                return Ok(());
            }
        };

        let mut empty = true;
        for entry in read_dir {
            empty = false;
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    skipped.push(SkippedPath {
                        path: prefix.to_string(),
                        reason: format!("reading directory entry: {e}"),
                    });
                    continue;
                }
            };
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %path.display(), "skipping non-UTF-8 file name");
                skipped.push(SkippedPath {
                    path: path.to_string_lossy().into_owned(),
                    reason: "file name is not valid UTF-8".into(),
                });
                continue;
            };
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            if self.is_excluded(&name, &rel) {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    skipped.push(SkippedPath {
                        path: rel,
                        reason: format!("stat failed: {e}"),
                    });
                    continue;
                }
            };
            if file_type.is_symlink() {
                warn!(path = %rel, "skipping symbolic link");
                skipped.push(SkippedPath {
                    path: rel,
                    reason: "symbolic link".into(),
                });
            } else if file_type.is_dir() {
                self.collect(&path, &rel, out, skipped)?;
            } else if file_type.is_file() {
                out.push(SourceFile { abs: path, rel });
            } else {
                skipped.push(SkippedPath {
                    path: rel,
                    reason: "not a regular file".into(),
                });
            }
        }

        if empty && !prefix.is_empty() {
            warn!(path = prefix, "skipping empty directory");
            skipped.push(SkippedPath {
                path: prefix.to_string(),
                reason: "empty directory".into(),
            });
        }
        Ok(())
    }

    fn scan_file(&self, file: &SourceFile) -> Result<ScannedFile, SkippedPath> {
        let unreadable = |e: std::io::Error| SkippedPath {
            path: file.rel.clone(),
            reason: format!("unreadable: {e}"),
        };
        let meta = std::fs::metadata(&file.abs).map_err(unreadable)?;
        let data = std::fs::read(&file.abs).map_err(unreadable)?;

        let compress = should_compress(&file.abs);
        let chunks = split(&data, ChunkSizes::for_path(&file.abs), self.hasher);
        let sources = chunks
            .iter()
            .map(|c| {
                (
                    c.id,
                    ChunkSource {
                        path: file.abs.clone(),
                        offset: c.offset,
                        length: c.length,
                        compress,
                    },
                )
            })
            .collect();

        let entry = ManifestEntry {
            path: file.rel.clone(),
            size: data.len() as u64,
            mtime: mtime_secs(&meta),
            mode: file_mode(&meta),
            chunks: chunks
                .iter()
                .map(|c| ChunkRef {
                    id: c.id,
                    size: c.length as u32,
                })
                .collect(),
            content_hash: hash_to_hex(&hash_bytes(&data)),
        };
        Ok(ScannedFile { entry, sources })
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// File-level difference between two sorted entry lists. A file counts as
/// modified when its content or permission bits changed; `bytes_to_upload`
/// is left at zero.
pub fn compute_diff(previous: &[ManifestEntry], current: &[ManifestEntry]) -> Diff {
    let before: BTreeMap<&str, &ManifestEntry> =
        previous.iter().map(|e| (e.path.as_str(), e)).collect();
    let after: BTreeMap<&str, &ManifestEntry> =
        current.iter().map(|e| (e.path.as_str(), e)).collect();

    let mut diff = Diff::default();
    for (path, entry) in &after {
        match before.get(path) {
            None => diff.added.push(path.to_string()),
            Some(old) if old.content_hash != entry.content_hash || old.mode != entry.mode => {
                diff.modified.push(path.to_string())
            }
            Some(_) => {}
        }
    }
    diff.removed = before
        .keys()
        .filter(|path| !after.contains_key(*path))
        .map(|path| path.to_string())
        .collect();
    diff
}
