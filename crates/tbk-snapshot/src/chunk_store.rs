//! ChunkStore: encrypted chunk blobs in the remote store
//!
//! Blob = `encrypt(DEK, frame(plaintext), AAD = chunk id)`, stored at
//! `{prefix}/chunks/{chunk id hex}`. Binding the id as AAD means a blob
//! moved to another key fails authentication instead of decrypting.

use tbk_chunks::{frame_chunk, unframe_chunk, ChunkHasher, ChunkId, MAX_CHUNK_SIZE};
use tbk_core::{VaultError, VaultResult};
use tbk_crypto::{aead, DataKey};
use tbk_storage::{Layout, RemoteStore};
use zeroize::Zeroizing;

/// Frame (optionally compress) and seal one chunk.
pub fn seal_chunk(
    dek: &DataKey,
    id: &ChunkId,
    plaintext: &[u8],
    compress: bool,
    level: i32,
) -> VaultResult<Vec<u8>> {
    let framed = Zeroizing::new(frame_chunk(plaintext, compress, level)?);
    aead::encrypt(dek.as_bytes(), &framed, id.as_bytes())
}

/// Decrypt and unframe one chunk, then check that its plaintext hashes back
/// to `id`.
pub fn open_chunk(
    dek: &DataKey,
    id: &ChunkId,
    sealed: &[u8],
    hasher: &ChunkHasher,
) -> VaultResult<Vec<u8>> {
    let framed = Zeroizing::new(
        aead::decrypt(dek.as_bytes(), sealed, id.as_bytes())
            .map_err(|_| VaultError::Authentication(format!("chunk {id}")))?,
    );
    let plaintext = unframe_chunk(&framed, MAX_CHUNK_SIZE)?;
    if hasher.id(&plaintext) != *id {
        return Err(VaultError::Integrity(format!("chunk {id}")));
    }
    Ok(plaintext)
}

#[derive(Debug, Clone)]
pub struct ChunkStore<S> {
    store: S,
    layout: Layout,
}

impl<S: RemoteStore> ChunkStore<S> {
    pub fn new(store: S, layout: Layout) -> Self {
        Self { store, layout }
    }

    pub async fn exists(&self, id: &ChunkId) -> VaultResult<bool> {
        self.store.exists(&self.layout.chunk_key(&id.to_hex())).await
    }

    /// Fetch a sealed blob; absence is [`VaultError::ChunkMissing`].
    pub async fn get(&self, id: &ChunkId) -> VaultResult<Vec<u8>> {
        self.store
            .get(&self.layout.chunk_key(&id.to_hex()))
            .await?
            .ok_or_else(|| VaultError::ChunkMissing(id.to_hex()))
    }

    pub async fn put(&self, id: &ChunkId, sealed: Vec<u8>) -> VaultResult<()> {
        self.store
            .put(&self.layout.chunk_key(&id.to_hex()), sealed)
            .await
    }

    pub async fn delete(&self, id: &ChunkId) -> VaultResult<()> {
        self.store
            .delete(&self.layout.chunk_key(&id.to_hex()))
            .await
    }

    /// Every chunk id present remotely. Names that are not chunk ids are
    /// ignored.
    pub async fn list(&self) -> VaultResult<Vec<ChunkId>> {
        let names = self.store.list(&self.layout.chunks_dir()).await?;
        Ok(names.iter().filter_map(|n| n.parse().ok()).collect())
    }
}
