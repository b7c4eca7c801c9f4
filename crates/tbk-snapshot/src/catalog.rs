//! Remote manifest catalog: listing, verified fetch, commit

use tbk_core::{VaultError, VaultResult};
use tbk_crypto::PublicKey;
use tbk_storage::{Layout, RemoteStore};
use tracing::{debug, info, warn};

use crate::manifest::{validate_snapshot_id, SignedManifest};

/// The manifests of one vault. Everything fetched through here has passed
/// signature verification against the profile's public key.
#[derive(Debug, Clone)]
pub struct Catalog<S> {
    store: S,
    layout: Layout,
    public_key: PublicKey,
}

impl<S: RemoteStore> Catalog<S> {
    pub fn new(store: S, layout: Layout, public_key: PublicKey) -> Self {
        Self {
            store,
            layout,
            public_key,
        }
    }

    /// Snapshot ids, oldest first. Foreign objects under the manifests
    /// prefix are skipped.
    pub async fn list_ids(&self) -> VaultResult<Vec<String>> {
        let mut ids = self.store.list(&self.layout.manifests_dir()).await?;
        ids.retain(|id| match validate_snapshot_id(id) {
            Ok(()) => true,
            Err(_) => {
                warn!(name = %id, "ignoring non-manifest object");
                false
            }
        });
        Ok(ids)
    }

    pub async fn fetch(&self, snapshot_id: &str) -> VaultResult<SignedManifest> {
        validate_snapshot_id(snapshot_id)?;
        let raw = self
            .store
            .get(&self.layout.manifest_key(snapshot_id))
            .await?
            .ok_or_else(|| VaultError::SnapshotNotFound(snapshot_id.to_string()))?;
        let manifest = SignedManifest::from_bytes_verified(raw, snapshot_id, &self.public_key)?;
        debug!(snapshot_id, "manifest verified");
        Ok(manifest)
    }

    /// The highest snapshot id in the listing, fetched fresh and verified.
    pub async fn latest(&self) -> VaultResult<Option<SignedManifest>> {
        match self.list_ids().await?.pop() {
            Some(id) => Ok(Some(self.fetch(&id).await?)),
            None => Ok(None),
        }
    }

    /// Publish a signed manifest. This single put is the commit point of a
    /// snapshot; an existing manifest under the same id is never replaced.
    pub async fn commit(&self, manifest: &SignedManifest) -> VaultResult<()> {
        validate_snapshot_id(manifest.snapshot_id())?;
        let key = self.layout.manifest_key(manifest.snapshot_id());
        if self.store.exists(&key).await? {
            return Err(VaultError::LockContention(format!(
                "snapshot {} already exists",
                manifest.snapshot_id()
            )));
        }
        self.store.put(&key, manifest.as_bytes().to_vec()).await?;
        info!(snapshot_id = manifest.snapshot_id(), "manifest committed");
        Ok(())
    }

    pub async fn delete(&self, snapshot_id: &str) -> VaultResult<()> {
        validate_snapshot_id(snapshot_id)?;
        let key = self.layout.manifest_key(snapshot_id);
        if !self.store.exists(&key).await? {
            return Err(VaultError::SnapshotNotFound(snapshot_id.to_string()));
        }
        self.store.delete(&key).await?;
        info!(snapshot_id, "manifest deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tbk_crypto::SigningKeyPair;
    use tbk_storage::OpendalStore;

    fn catalog() -> (Catalog<OpendalStore>, OpendalStore, Layout) {
        let store = OpendalStore::memory().unwrap();
        let layout = Layout::new("vault");
        let public_key = SigningKeyPair::generate().public_key();
        (Catalog::new(store.clone(), layout.clone(), public_key), store, layout)
    }

    #[tokio::test]
    async fn test_listing_skips_foreign_objects() {
        let (catalog, store, layout) = catalog();
        for name in ["00000002-20", "00000001-10", "notes.txt", "latest"] {
            store
                .put(&format!("{}/{name}", layout.manifests_dir()), b"x".to_vec())
                .await
                .unwrap();
        }
        assert_eq!(
            catalog.list_ids().await.unwrap(),
            vec!["00000001-10", "00000002-20"]
        );
    }

    #[tokio::test]
    async fn test_malformed_ids_never_reach_the_store() {
        let (catalog, store, layout) = catalog();
        let chunk = layout.chunk_key("abc");
        store.put(&chunk, b"ciphertext".to_vec()).await.unwrap();

        for bad in ["../chunks/abc", "latest", ""] {
            assert!(matches!(
                catalog.fetch(bad).await.unwrap_err(),
                VaultError::InvalidSnapshotId(_)
            ));
            assert!(matches!(
                catalog.delete(bad).await.unwrap_err(),
                VaultError::InvalidSnapshotId(_)
            ));
        }
        assert!(store.exists(&chunk).await.unwrap());
    }
}
