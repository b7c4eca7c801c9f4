//! Encrypted-file secret store
//!
//! File format: `<state_dir>/secrets/<profile>.sealed` holds a JSON map
//! `{ name: secret }` sealed with XChaCha20-Poly1305 under
//! `HKDF(master, "tbk-secret-store")`, AAD = `tbk-secrets:<profile>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tbk_core::atomic::write_private;
use tbk_core::{VaultError, VaultResult};
use tbk_crypto::keys::derive_secret_store_key;
use tbk_crypto::{aead, MasterKey, KEY_SIZE};
use zeroize::{Zeroize, Zeroizing};

use crate::SecretStore;

/// Decrypted contents; values are wiped on drop.
#[derive(Default)]
struct SecretMap(BTreeMap<String, String>);

impl Drop for SecretMap {
    fn drop(&mut self) {
        for value in self.0.values_mut() {
            value.zeroize();
        }
    }
}

pub struct EncryptedFileStore {
    path: PathBuf,
    aad: Vec<u8>,
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl EncryptedFileStore {
    /// Open (or prepare to create) the store. Fails with
    /// [`VaultError::Authentication`] if an existing file does not open under
    /// this master key.
    pub fn open(state_dir: &Path, profile: &str, master: &MasterKey) -> VaultResult<Self> {
        let store = Self {
            path: state_dir.join("secrets").join(format!("{profile}.sealed")),
            aad: format!("tbk-secrets:{profile}").into_bytes(),
            key: derive_secret_store_key(master)?,
        };
        store.load()?;
        Ok(store)
    }

    fn load(&self) -> VaultResult<SecretMap> {
        if !self.path.exists() {
            return Ok(SecretMap::default());
        }
        let sealed = std::fs::read(&self.path)?;
        let plaintext = Zeroizing::new(aead::decrypt(&self.key, &sealed, &self.aad)?);
        let map = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Other(anyhow::anyhow!("parsing secret store: {e}")))?;
        Ok(SecretMap(map))
    }

    fn save(&self, map: &SecretMap) -> VaultResult<()> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&map.0)
                .map_err(|e| VaultError::Other(anyhow::anyhow!("serializing secret store: {e}")))?,
        );
        let sealed = aead::encrypt(&self.key, &plaintext, &self.aad)?;

        write_private(&self.path, &sealed)
    }
}

impl SecretStore for EncryptedFileStore {
    fn put(&self, name: &str, secret: &SecretString) -> VaultResult<()> {
        let mut map = self.load()?;
        map.0
            .insert(name.to_string(), secret.expose_secret().to_string());
        self.save(&map)?;
        tracing::debug!(path = %self.path.display(), key = name, "stored secret in encrypted file");
        Ok(())
    }

    fn get(&self, name: &str) -> VaultResult<Option<SecretString>> {
        let map = self.load()?;
        Ok(map.0.get(name).map(|v| SecretString::from(v.clone())))
    }

    fn delete(&self, name: &str) -> VaultResult<()> {
        let mut map = self.load()?;
        if let Some(mut old) = map.0.remove(name) {
            old.zeroize();
            self.save(&map)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
