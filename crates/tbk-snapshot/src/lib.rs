//! tbk-snapshot: incremental encrypted snapshots and verified restore
//!
//! - `builder`: walk a source tree into a sorted, chunked manifest draft
//! - `manifest`: signed manifest format, sealed contents, snapshot ids
//! - `chunk_store`: sealing/opening chunk blobs and their remote lookup
//! - `catalog`: remote manifest listing, verified fetch, commit
//! - `snapshot` / `restore`: the two engines
//! - `hooks`: lifecycle hooks and the JSON-lines audit log

pub mod builder;
pub mod catalog;
pub mod chunk_store;
pub mod hooks;
pub mod lock;
pub mod manifest;
pub mod restore;
pub mod session;
pub mod snapshot;

pub use builder::{compute_diff, BuildOutput, ManifestBuilder, SkippedPath};
pub use catalog::Catalog;
pub use chunk_store::ChunkStore;
pub use hooks::{AuditLog, AuditRecord, HookSet, VaultHooks};
pub use lock::ProfileLock;
pub use manifest::{ManifestDraft, ManifestEntry, SignedManifest};
pub use restore::{FailedFile, RestoreEngine, RestoreOptions, RestoreReport};
pub use session::UnlockedVault;
pub use snapshot::{
    ProgressFn, SnapshotEngine, SnapshotOutcome, SnapshotPhase, SnapshotReport, SnapshotSummary,
};
