//! BLAKE3 hashing: whole-file content hashes and keyed chunk identifiers
//!
//! File content hashes are plain BLAKE3 and never leave the encrypted
//! manifest. Chunk ids are stored in the clear as remote object names, so they
//! use BLAKE3's keyed mode with a per-vault key: the remote cannot test
//! whether a known plaintext is stored, yet ids stay stable across snapshots
//! of the same vault, which is all deduplication needs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tbk_core::{VaultError, VaultResult};
use zeroize::Zeroizing;

/// A BLAKE3 hash digest (32 bytes), displayed as 64 hex chars
pub type Hash = blake3::Hash;

/// Hash a byte slice in memory.
pub fn hash_bytes(data: &[u8]) -> Hash {
    blake3::hash(data)
}

/// Format a hash as lowercase hex string (64 chars)
pub fn hash_to_hex(hash: &Hash) -> String {
    hash.to_hex().to_string()
}

/// Parse a 64-char hex string into a Hash
pub fn hash_from_hex(hex: &str) -> VaultResult<Hash> {
    blake3::Hash::from_hex(hex)
        .map_err(|e| VaultError::Other(anyhow::anyhow!("invalid BLAKE3 hex '{hex}': {e}")))
}

/// Content address of one chunk (keyed BLAKE3 of its plaintext)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId([u8; 32]);

impl ChunkId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", &self.to_hex()[..12])
    }
}

impl FromStr for ChunkId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(*hash_from_hex(s)?.as_bytes()))
    }
}

impl Serialize for ChunkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChunkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Computes chunk ids under a per-vault key. The key zeroizes on drop.
#[derive(Clone)]
pub struct ChunkHasher {
    key: Zeroizing<[u8; 32]>,
}

impl ChunkHasher {
    pub fn new(key: Zeroizing<[u8; 32]>) -> Self {
        Self { key }
    }

    pub fn id(&self, data: &[u8]) -> ChunkId {
        ChunkId(*blake3::keyed_hash(&self.key, data).as_bytes())
    }
}

impl fmt::Debug for ChunkHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkHasher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hasher(byte: u8) -> ChunkHasher {
        ChunkHasher::new(Zeroizing::new([byte; 32]))
    }

    #[test]
    fn empty_hash_is_deterministic() {
        assert_eq!(hash_bytes(b""), hash_bytes(b""));
    }

    #[test]
    fn hash_hex_roundtrip() {
        let h = hash_bytes(b"hello tbk");
        let hex = hash_to_hex(&h);
        assert_eq!(hex.len(), 64);
        assert_eq!(hash_from_hex(&hex).unwrap(), h);
    }

    #[test]
    fn keyed_id_differs_from_plain_hash() {
        let id = hasher(1).id(b"known plaintext");
        assert_ne!(id.as_bytes(), hash_bytes(b"known plaintext").as_bytes());
    }

    #[test]
    fn keyed_id_depends_on_key() {
        assert_ne!(hasher(1).id(b"same"), hasher(2).id(b"same"));
        assert_eq!(hasher(1).id(b"same"), hasher(1).id(b"same"));
    }

    #[test]
    fn chunk_id_serde_as_hex_string() {
        let id = hasher(3).id(b"chunk");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: ChunkId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn chunk_id_rejects_bad_hex() {
        assert!("zz".parse::<ChunkId>().is_err());
        assert!(serde_json::from_str::<ChunkId>("\"abc\"").is_err());
    }

    proptest! {
        #[test]
        fn hash_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            prop_assert_eq!(hash_bytes(&data), hash_bytes(&data), "BLAKE3 must be deterministic for same input");
        }

        #[test]
        fn chunk_id_hex_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=1024)) {
            let id = hasher(7).id(&data);
            prop_assert_eq!(id.to_hex().parse::<ChunkId>().unwrap(), id);
        }
    }
}
