//! RemoteStore: the blob-store interface the engine depends on

use std::future::Future;

use opendal::{ErrorKind, Operator};
use tbk_core::{VaultError, VaultResult};

use crate::retry::{is_retryable, RetryPolicy};

/// A passive key/value blob store.
///
/// Implementations must give read-after-write consistency for a single key.
pub trait RemoteStore: Clone + Send + Sync + 'static {
    fn put(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = VaultResult<()>> + Send;

    /// `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> impl Future<Output = VaultResult<Option<Vec<u8>>>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = VaultResult<bool>> + Send;

    /// File names directly under `dir`, sorted. A missing dir lists as empty.
    fn list(&self, dir: &str) -> impl Future<Output = VaultResult<Vec<String>>> + Send;

    /// Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = VaultResult<()>> + Send;
}

/// [`RemoteStore`] over an OpenDAL operator (S3, local fs, memory).
#[derive(Debug, Clone)]
pub struct OpendalStore {
    op: Operator,
    /// Attempts the operator's retry layer makes per call; reported on
    /// failed uploads
    max_attempts: u32,
}

impl OpendalStore {
    /// Wrap an operator as-is. Use [`OpendalStore::with_retry`] for one that
    /// should retry transient faults.
    pub fn new(op: Operator) -> Self {
        Self { op, max_attempts: 1 }
    }

    /// Wrap an operator, layering `policy` on top of it.
    pub fn with_retry(op: Operator, policy: &RetryPolicy) -> Self {
        Self {
            op: op.layer(policy.layer()),
            max_attempts: policy.max_attempts,
        }
    }

    /// Ephemeral in-process store.
    pub fn memory() -> VaultResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(|e| classify("memory", e))?
            .finish();
        Ok(Self::new(op))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }
}

/// Map OpenDAL errors onto the vault taxonomy: transient faults stay
/// retryable for the caller, everything else is terminal.
fn classify(key: &str, e: opendal::Error) -> VaultError {
    if is_retryable(&e) {
        VaultError::Transient(format!("{key}: {e}"))
    } else {
        VaultError::Remote(format!("{key}: {e}"))
    }
}

/// Like [`classify`], but an upload that was still failing transiently when
/// the retry layer gave up is reported as [`VaultError::UploadFailed`].
fn put_error(key: &str, e: opendal::Error, attempts: u32) -> VaultError {
    if e.is_persistent() && is_retryable(&e) {
        VaultError::UploadFailed {
            key: key.to_string(),
            attempts,
            reason: e.to_string(),
        }
    } else {
        classify(key, e)
    }
}

impl RemoteStore for OpendalStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> VaultResult<()> {
        self.op
            .write(key, bytes)
            .await
            .map(|_| ())
            .map_err(|e| put_error(key, e, self.max_attempts))
    }

    async fn get(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        match self.op.read(key).await {
            Ok(buf) => Ok(Some(buf.to_vec())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(classify(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> VaultResult<bool> {
        self.op.exists(key).await.map_err(|e| classify(key, e))
    }

    async fn list(&self, dir: &str) -> VaultResult<Vec<String>> {
        let dir = format!("{}/", dir.trim_end_matches('/'));
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(classify(&dir, e)),
        };

        let mut names: Vec<String> = entries
            .into_iter()
            .filter(|entry| !entry.path().ends_with('/'))
            .map(|entry| entry.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, key: &str) -> VaultResult<()> {
        self.op.delete(key).await.map_err(|e| classify(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = OpendalStore::memory().unwrap();
        store.put("v/chunks/aa", b"blob".to_vec()).await.unwrap();

        assert_eq!(store.get("v/chunks/aa").await.unwrap().unwrap(), b"blob");
        assert!(store.exists("v/chunks/aa").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = OpendalStore::memory().unwrap();
        assert!(store.get("v/chunks/nope").await.unwrap().is_none());
        assert!(!store.exists("v/chunks/nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_sorted_files_only() {
        let store = OpendalStore::memory().unwrap();
        for name in ["00000002-b", "00000001-a", "00000003-c"] {
            store
                .put(&format!("v/manifests/{name}"), vec![1])
                .await
                .unwrap();
        }
        store.put("v/chunks/x", vec![2]).await.unwrap();

        let names = store.list("v/manifests").await.unwrap();
        assert_eq!(names, vec!["00000001-a", "00000002-b", "00000003-c"]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let store = OpendalStore::memory().unwrap();
        assert!(store.list("nothing/here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = OpendalStore::memory().unwrap();
        store.put("k", vec![0]).await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        // idempotent
        store.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_backend_lists_missing_dir_as_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let builder = opendal::services::Fs::default().root(&tmp.path().to_string_lossy());
        let store = OpendalStore::new(Operator::new(builder).unwrap().finish());

        assert!(store.list("v/manifests").await.unwrap().is_empty());
        store.put("v/manifests/00000001-a", vec![1]).await.unwrap();
        assert_eq!(store.list("v/manifests").await.unwrap(), vec!["00000001-a"]);
    }

    #[tokio::test]
    async fn test_retrying_store_roundtrip() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let store = OpendalStore::with_retry(op, &policy);

        store.put("v/chunks/bb", b"blob".to_vec()).await.unwrap();
        assert_eq!(store.get("v/chunks/bb").await.unwrap().unwrap(), b"blob");
        assert!(store.get("v/chunks/nope").await.unwrap().is_none());
        assert_eq!(store.list("v/chunks").await.unwrap(), vec!["bb"]);
    }

    #[test]
    fn test_exhausted_upload_reports_attempts() {
        let exhausted = opendal::Error::new(ErrorKind::Unexpected, "503 slow down").set_persistent();
        match put_error("v/chunks/aa", exhausted, 3) {
            VaultError::UploadFailed { key, attempts, .. } => {
                assert_eq!(key, "v/chunks/aa");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_terminal_upload_error_stays_remote() {
        let denied = opendal::Error::new(ErrorKind::PermissionDenied, "403").set_persistent();
        assert!(matches!(put_error("k", denied, 3), VaultError::Remote(_)));

        let temporary = opendal::Error::new(ErrorKind::Unexpected, "reset").set_temporary();
        assert!(matches!(put_error("k", temporary, 1), VaultError::Transient(_)));
    }
}
