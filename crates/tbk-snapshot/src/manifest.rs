//! Signed snapshot manifests
//!
//! Stored form: `b"TBKM" || Ed25519 signature (64) || body JSON`. The
//! signature covers the body bytes exactly as stored, so verification never
//! depends on re-serializing anything.
//!
//! File names and the chunk-key index live in [`ManifestContents`], sealed
//! under the snapshot's DEK. The remote only sees the snapshot id, sequence,
//! timestamps, the previous-manifest hash and wrapped keys.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tbk_chunks::{hash_bytes, hash_to_hex, ChunkId};
use tbk_core::{VaultError, VaultResult};
use tbk_crypto::{
    aead, b64_decode, b64_encode, unwrap_dek, DataKey, MasterKey, PublicKey, SigningKeyPair,
    SIGNATURE_SIZE,
};
use zeroize::Zeroizing;

pub const MANIFEST_MAGIC: &[u8; 4] = b"TBKM";
pub const MANIFEST_VERSION: u32 = 1;

/// Snapshot ids sort lexicographically in sequence order.
pub fn snapshot_id(sequence: u64, created_at: u64) -> String {
    format!("{sequence:08}-{created_at}")
}

/// Reject anything that is not `<sequence>-<created_at>` before it is joined
/// into a remote key.
pub fn validate_snapshot_id(id: &str) -> VaultResult<()> {
    let well_formed = id.split_once('-').is_some_and(|(seq, ts)| {
        seq.len() >= 8
            && !ts.is_empty()
            && seq.bytes().all(|b| b.is_ascii_digit())
            && ts.bytes().all(|b| b.is_ascii_digit())
    });
    if well_formed {
        Ok(())
    } else {
        Err(VaultError::InvalidSnapshotId(id.to_string()))
    }
}

/// Reference to one chunk of a file, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: ChunkId,
    /// Plaintext length
    pub size: u32,
}

/// One regular file in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Relative to the source root, `/`-separated
    pub path: String,
    pub size: u64,
    /// Modification time, unix seconds
    pub mtime: i64,
    /// Unix permission bits
    pub mode: u32,
    pub chunks: Vec<ChunkRef>,
    /// Plain BLAKE3 of the whole file, hex
    pub content_hash: String,
}

/// Unsigned, unencrypted description of a source tree. Entries are always
/// sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDraft {
    entries: Vec<ManifestEntry>,
}

impl ManifestDraft {
    pub fn new(mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries
            .binary_search_by(|e| e.path.as_str().cmp(path))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn chunk_ids(&self) -> BTreeSet<ChunkId> {
        self.entries
            .iter()
            .flat_map(|e| e.chunks.iter().map(|c| c.id))
            .collect()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Canonical serialization: identical trees give identical bytes.
    pub fn canonical_bytes(&self) -> VaultResult<Vec<u8>> {
        serde_json::to_vec(&self.entries)
            .map_err(|e| VaultError::Other(anyhow::anyhow!("serializing manifest entries: {e}")))
    }
}

/// The sealed part of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestContents {
    pub entries: Vec<ManifestEntry>,
    /// Chunk id → id of the snapshot whose DEK sealed that chunk
    pub chunk_keys: BTreeMap<ChunkId, String>,
}

fn contents_aad(snapshot_id: &str) -> Vec<u8> {
    let mut aad = b"tbk-manifest:".to_vec();
    aad.extend_from_slice(snapshot_id.as_bytes());
    aad
}

impl ManifestContents {
    pub fn seal(&self, dek: &DataKey, snapshot_id: &str) -> VaultResult<String> {
        let plaintext = Zeroizing::new(serde_json::to_vec(self).map_err(|e| {
            VaultError::Other(anyhow::anyhow!("serializing manifest contents: {e}"))
        })?);
        let sealed = aead::encrypt(dek.as_bytes(), &plaintext, &contents_aad(snapshot_id))?;
        Ok(b64_encode(&sealed))
    }

    pub fn open(sealed: &str, dek: &DataKey, snapshot_id: &str) -> VaultResult<Self> {
        let sealed = b64_decode("manifest contents", sealed)
            .map_err(|_| VaultError::TamperedManifest(snapshot_id.to_string()))?;
        let plaintext = Zeroizing::new(aead::decrypt(
            dek.as_bytes(),
            &sealed,
            &contents_aad(snapshot_id),
        )?);
        serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Integrity(format!("manifest {snapshot_id} contents: {e}")))
    }
}

/// Signed fields of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestBody {
    pub version: u32,
    pub snapshot_id: String,
    pub sequence: u64,
    /// Unix seconds
    pub created_at: u64,
    /// BLAKE3 (hex) of the stored bytes of the previous manifest
    pub previous_manifest_hash: Option<String>,
    /// Signer's Ed25519 public key, base64
    pub public_key: String,
    /// Snapshot id → DEK wrapped under the master key, base64. Holds every
    /// key the chunks of this snapshot were sealed with.
    pub key_ring: BTreeMap<String, String>,
    /// [`ManifestContents`] sealed under this snapshot's DEK, base64
    pub contents: String,
}

/// A manifest whose signature has been checked (or that was just signed).
#[derive(Debug, Clone)]
pub struct SignedManifest {
    raw: Vec<u8>,
    body: ManifestBody,
}

impl SignedManifest {
    pub fn sign(body: ManifestBody, signing: &SigningKeyPair) -> VaultResult<Self> {
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| VaultError::Other(anyhow::anyhow!("serializing manifest body: {e}")))?;
        let signature = signing.sign(&body_bytes);

        let mut raw = Vec::with_capacity(MANIFEST_MAGIC.len() + SIGNATURE_SIZE + body_bytes.len());
        raw.extend_from_slice(MANIFEST_MAGIC);
        raw.extend_from_slice(&signature);
        raw.extend_from_slice(&body_bytes);
        Ok(Self { raw, body })
    }

    /// Parse stored bytes, accepting them only if the signature verifies
    /// against `public_key` and the body claims to be `snapshot_id`.
    ///
    /// Every failure is reported as [`VaultError::TamperedManifest`].
    pub fn from_bytes_verified(
        raw: Vec<u8>,
        snapshot_id: &str,
        public_key: &PublicKey,
    ) -> VaultResult<Self> {
        let tampered = || VaultError::TamperedManifest(snapshot_id.to_string());

        let header = MANIFEST_MAGIC.len() + SIGNATURE_SIZE;
        if raw.len() <= header || &raw[..MANIFEST_MAGIC.len()] != MANIFEST_MAGIC {
            tracing::warn!(snapshot_id, len = raw.len(), "manifest framing invalid");
            return Err(tampered());
        }
        let signature = &raw[MANIFEST_MAGIC.len()..header];
        let body_bytes = &raw[header..];
        if !public_key.verify(body_bytes, signature) {
            tracing::warn!(snapshot_id, "manifest signature does not verify");
            return Err(tampered());
        }

        let body: ManifestBody = serde_json::from_slice(body_bytes).map_err(|_| tampered())?;
        if body.snapshot_id != snapshot_id
            || body.public_key != public_key.to_base64()
            || body.version != MANIFEST_VERSION
        {
            tracing::warn!(
                snapshot_id,
                claimed = %body.snapshot_id,
                version = body.version,
                "manifest header mismatch"
            );
            return Err(tampered());
        }
        Ok(Self { raw, body })
    }

    pub fn body(&self) -> &ManifestBody {
        &self.body
    }

    pub fn snapshot_id(&self) -> &str {
        &self.body.snapshot_id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// BLAKE3 (hex) of the stored bytes; the next manifest chains to it.
    pub fn hash(&self) -> String {
        hash_to_hex(&hash_bytes(&self.raw))
    }

    /// Unwrap the DEK registered under `key_id` in this manifest's key ring.
    pub fn unwrap_key(&self, master: &MasterKey, key_id: &str) -> VaultResult<DataKey> {
        let wrapped = self.body.key_ring.get(key_id).ok_or_else(|| {
            VaultError::Integrity(format!(
                "manifest {} has no key for {key_id}",
                self.body.snapshot_id
            ))
        })?;
        let wrapped = b64_decode("wrapped DEK", wrapped)
            .map_err(|_| VaultError::TamperedManifest(self.body.snapshot_id.clone()))?;
        unwrap_dek(master, &wrapped, key_id)
    }

    /// Unwrap this snapshot's own DEK and decrypt the contents.
    pub fn open(&self, master: &MasterKey) -> VaultResult<ManifestContents> {
        let dek = self.unwrap_key(master, &self.body.snapshot_id)?;
        ManifestContents::open(&self.body.contents, &dek, &self.body.snapshot_id)
    }
}
