//! Key hierarchy: master key → derived subkeys, per-snapshot DEKs, DEK wrapping

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use tbk_core::{VaultError, VaultResult};
use zeroize::{Zeroize, Zeroizing};

use crate::aead;
use crate::kdf::MasterKey;
use crate::KEY_SIZE;

/// HKDF info labels. Changing any of these orphans existing vaults.
pub mod labels {
    pub const SIGNING_WRAP: &[u8] = b"tbk-signing-key";
    pub const CHUNK_ID: &[u8] = b"tbk-chunk-id";
    pub const SECRET_STORE: &[u8] = b"tbk-secret-store";
    pub const RECOVERY_WRAP: &[u8] = b"tbk-recovery-wrap";
}

/// A per-snapshot 256-bit data encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit data encryption key.
pub fn generate_data_key() -> DataKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    DataKey::from_bytes(bytes)
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
pub fn hkdf_derive(ikm: &[u8; KEY_SIZE], info: &[u8]) -> VaultResult<Zeroizing<[u8; KEY_SIZE]>> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(info, &mut okm[..])
        .map_err(|e| VaultError::Other(anyhow::anyhow!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

/// Key that seals the Ed25519 seed in the profile.
pub fn derive_signing_wrap_key(master: &MasterKey) -> VaultResult<Zeroizing<[u8; KEY_SIZE]>> {
    hkdf_derive(master.as_bytes(), labels::SIGNING_WRAP)
}

/// Key for the keyed BLAKE3 chunk ids.
pub fn derive_chunk_id_key(master: &MasterKey) -> VaultResult<Zeroizing<[u8; KEY_SIZE]>> {
    hkdf_derive(master.as_bytes(), labels::CHUNK_ID)
}

/// Key for the encrypted-file secret store.
pub fn derive_secret_store_key(master: &MasterKey) -> VaultResult<Zeroizing<[u8; KEY_SIZE]>> {
    hkdf_derive(master.as_bytes(), labels::SECRET_STORE)
}

fn dek_aad(snapshot_id: &str) -> Vec<u8> {
    let mut aad = b"tbk-dek-wrap:".to_vec();
    aad.extend_from_slice(snapshot_id.as_bytes());
    aad
}

/// Wrap a DEK under the master key, bound to the snapshot that created it.
///
/// Output: `[24-byte nonce][ciphertext + 16-byte tag]`
pub fn wrap_dek(master: &MasterKey, dek: &DataKey, snapshot_id: &str) -> VaultResult<Vec<u8>> {
    aead::encrypt(master.as_bytes(), dek.as_bytes(), &dek_aad(snapshot_id))
}

/// Unwrap a DEK. A wrong master key (wrong password) surfaces here as
/// [`VaultError::Authentication`].
pub fn unwrap_dek(master: &MasterKey, wrapped: &[u8], snapshot_id: &str) -> VaultResult<DataKey> {
    let plaintext = Zeroizing::new(aead::decrypt(
        master.as_bytes(),
        wrapped,
        &dek_aad(snapshot_id),
    )?);

    let key_bytes: [u8; KEY_SIZE] = plaintext.as_slice().try_into().map_err(|_| {
        VaultError::Authentication(format!(
            "unwrapped key has wrong size: {} bytes (expected {KEY_SIZE})",
            plaintext.len()
        ))
    })?;

    Ok(DataKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NONCE_SIZE, TAG_SIZE};

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_data_key_generation() {
        let k1 = generate_data_key();
        let k2 = generate_data_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_dek_wrap_unwrap_roundtrip() {
        let master = test_master_key();
        let dek = generate_data_key();

        let wrapped = wrap_dek(&master, &dek, "00000001-1700000000").unwrap();
        let unwrapped = unwrap_dek(&master, &wrapped, "00000001-1700000000").unwrap();

        assert_eq!(dek.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_dek_unwrap_wrong_master() {
        let dek = generate_data_key();
        let wrapped = wrap_dek(&MasterKey::from_bytes([1u8; KEY_SIZE]), &dek, "s").unwrap();

        let err = unwrap_dek(&MasterKey::from_bytes([2u8; KEY_SIZE]), &wrapped, "s").unwrap_err();
        assert!(matches!(err, VaultError::Authentication(_)));
    }

    #[test]
    fn test_dek_bound_to_snapshot_id() {
        let master = test_master_key();
        let wrapped = wrap_dek(&master, &generate_data_key(), "snap-a").unwrap();

        assert!(unwrap_dek(&master, &wrapped, "snap-b").is_err());
    }

    #[test]
    fn test_hkdf_derive_different_domains() {
        let master = test_master_key();
        let signing = derive_signing_wrap_key(&master).unwrap();
        let chunk = derive_chunk_id_key(&master).unwrap();
        let store = derive_secret_store_key(&master).unwrap();

        assert_ne!(*signing, *chunk);
        assert_ne!(*chunk, *store);
        assert_ne!(*signing, *master.as_bytes());
    }

    #[test]
    fn test_wrapped_key_size() {
        let wrapped = wrap_dek(&test_master_key(), &generate_data_key(), "s").unwrap();
        // nonce (24) + key (32) + tag (16) = 72
        assert_eq!(wrapped.len(), NONCE_SIZE + KEY_SIZE + TAG_SIZE);
    }
}
