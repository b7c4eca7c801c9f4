//! Platform keychain integration via the `keyring` crate:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)

use secrecy::{ExposeSecret, SecretString};
use tbk_core::{VaultError, VaultResult};
use zeroize::Zeroize;

use crate::SecretStore;

const SERVICE_NAME: &str = "tbk";

/// Keychain entries for one profile, named `{profile}/{secret}`.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    profile: String,
}

impl KeyringStore {
    pub fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
        }
    }

    fn entry(&self, name: &str) -> VaultResult<keyring::Entry> {
        keyring::Entry::new(SERVICE_NAME, &format!("{}/{name}", self.profile))
            .map_err(|e| VaultError::Other(anyhow::anyhow!("keychain entry creation: {e}")))
    }

    /// Full set/get/delete round trip. Creating an entry alone succeeds even
    /// on hosts with no usable keychain backend.
    pub fn probe(&self) -> bool {
        let probe = SecretString::from("tbk-probe");
        let ok = self.put("__probe__", &probe).is_ok()
            && matches!(self.get("__probe__"), Ok(Some(s)) if s.expose_secret() == "tbk-probe");
        let _ = self.delete("__probe__");
        ok
    }
}

impl SecretStore for KeyringStore {
    fn put(&self, name: &str, secret: &SecretString) -> VaultResult<()> {
        self.entry(name)?
            .set_password(secret.expose_secret())
            .map_err(|e| VaultError::Other(anyhow::anyhow!("keychain store for '{name}': {e}")))?;
        tracing::debug!(profile = %self.profile, key = name, "stored secret in platform keychain");
        Ok(())
    }

    fn get(&self, name: &str) -> VaultResult<Option<SecretString>> {
        match self.entry(name)?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::Other(anyhow::anyhow!(
                "keychain get for '{name}': {e}"
            ))),
        }
    }

    fn delete(&self, name: &str) -> VaultResult<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(profile = %self.profile, key = name, "deleted secret from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()), // already deleted
            Err(e) => Err(VaultError::Other(anyhow::anyhow!(
                "keychain delete for '{name}': {e}"
            ))),
        }
    }
}
