//! Lifecycle hooks and the JSON-lines audit log
//!
//! Hooks are registered explicitly on a [`HookSet`]. A failing hook is
//! logged and otherwise ignored; it can never fail or alter a snapshot or
//! restore.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tbk_core::{unix_now, VaultError, VaultResult};

use crate::restore::RestoreReport;
use crate::snapshot::SnapshotOutcome;

pub trait VaultHooks: Send + Sync {
    fn on_before_snapshot(&self, _profile: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_after_snapshot(&self, _profile: &str, _outcome: &SnapshotOutcome) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_before_restore(&self, _profile: &str, _snapshot_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_after_restore(
        &self,
        _profile: &str,
        _snapshot_id: &str,
        _report: &RestoreReport,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when a snapshot or restore returns an error.
    fn on_failure(&self, _profile: &str, _operation: &str, _error: &VaultError) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registered hooks, invoked in registration order.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn VaultHooks>>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn VaultHooks>) {
        self.hooks.push(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn each(&self, event: &str, f: impl Fn(&dyn VaultHooks) -> anyhow::Result<()>) {
        for hook in &self.hooks {
            if let Err(e) = f(hook.as_ref()) {
                tracing::warn!(event, error = %e, "hook failed");
            }
        }
    }

    pub fn before_snapshot(&self, profile: &str) {
        self.each("before_snapshot", |h| h.on_before_snapshot(profile));
    }

    pub fn after_snapshot(&self, profile: &str, outcome: &SnapshotOutcome) {
        self.each("after_snapshot", |h| h.on_after_snapshot(profile, outcome));
    }

    pub fn before_restore(&self, profile: &str, snapshot_id: &str) {
        self.each("before_restore", |h| h.on_before_restore(profile, snapshot_id));
    }

    pub fn after_restore(&self, profile: &str, snapshot_id: &str, report: &RestoreReport) {
        self.each("after_restore", |h| {
            h.on_after_restore(profile, snapshot_id, report)
        });
    }

    pub fn failure(&self, profile: &str, operation: &str, error: &VaultError) {
        self.each("failure", |h| h.on_failure(profile, operation, error));
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unix seconds
    pub ts: u64,
    pub profile: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub details: Value,
}

/// Field-name fragments whose values never reach the log.
const SENSITIVE: &[&str] = &[
    "password",
    "passphrase",
    "phrase",
    "secret",
    "token",
    "credential",
    "private",
    "access_key",
];

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (k, v) in map.iter_mut() {
                let lower = k.to_ascii_lowercase();
                if SENSITIVE.iter().any(|s| lower.contains(s)) {
                    *v = Value::String("[REDACTED]".into());
                } else {
                    redact(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

/// Appends one JSON object per event to `<state_dir>/audit.jsonl`.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("audit.jsonl"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        profile: &str,
        event: &str,
        snapshot_id: Option<&str>,
        mut details: Value,
    ) -> VaultResult<()> {
        redact(&mut details);
        let record = AuditRecord {
            ts: unix_now(),
            profile: profile.to_string(),
            event: event.to_string(),
            snapshot_id: snapshot_id.map(str::to_string),
            details,
        };
        let mut line = serde_json::to_string(&record)
            .map_err(|e| VaultError::Other(anyhow::anyhow!("serializing audit record: {e}")))?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| VaultError::Other(anyhow::anyhow!("audit log lock poisoned")))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// The last `n` records, oldest first. Unparseable lines are skipped.
    pub fn read_last(&self, n: usize) -> VaultResult<Vec<AuditRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records: Vec<AuditRecord> = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }
}

impl VaultHooks for AuditLog {
    fn on_before_snapshot(&self, profile: &str) -> anyhow::Result<()> {
        self.record(profile, "snapshot_started", None, Value::Null)?;
        Ok(())
    }

    fn on_after_snapshot(&self, profile: &str, outcome: &SnapshotOutcome) -> anyhow::Result<()> {
        match outcome {
            SnapshotOutcome::NoChanges { latest } => {
                self.record(profile, "snapshot_unchanged", Some(latest), Value::Null)?
            }
            SnapshotOutcome::Committed(report) => self.record(
                profile,
                "snapshot_committed",
                Some(&report.snapshot_id),
                json!({
                    "files": report.files,
                    "added": report.diff.added.len(),
                    "modified": report.diff.modified.len(),
                    "removed": report.diff.removed.len(),
                    "chunks_uploaded": report.chunks_uploaded,
                    "chunks_reused": report.chunks_reused,
                    "bytes_uploaded": report.bytes_uploaded,
                    "skipped": report.skipped.len(),
                }),
            )?,
        }
        Ok(())
    }

    fn on_before_restore(&self, profile: &str, snapshot_id: &str) -> anyhow::Result<()> {
        self.record(profile, "restore_started", Some(snapshot_id), Value::Null)?;
        Ok(())
    }

    fn on_after_restore(
        &self,
        profile: &str,
        snapshot_id: &str,
        report: &RestoreReport,
    ) -> anyhow::Result<()> {
        self.record(
            profile,
            "restore_finished",
            Some(snapshot_id),
            json!({
                "restored": report.restored.len(),
                "failed": report.failed.len(),
                "bytes_written": report.bytes_written,
            }),
        )?;
        Ok(())
    }

    fn on_failure(&self, profile: &str, operation: &str, error: &VaultError) -> anyhow::Result<()> {
        self.record(
            profile,
            &format!("{operation}_failed"),
            None,
            json!({ "error": error.to_string() }),
        )?;
        Ok(())
    }
}
