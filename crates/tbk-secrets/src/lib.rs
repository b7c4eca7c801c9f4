//! tbk-secrets: where a vault keeps its remote credentials, and how it asks
//! for passwords
//!
//! A vault picks one [`SecretStore`] backend at `init` and records the choice
//! in its profile:
//!   1. [`KeyringStore`]: the platform keychain (macOS Keychain, Secret Service, Windows Credential Manager)
//!   2. [`EncryptedFileStore`]: a JSON file sealed under a master-derived key, used when no keychain is usable

pub mod file;
pub mod keychain;
pub mod prompt;

pub use file::EncryptedFileStore;
pub use keychain::KeyringStore;
pub use prompt::{EnvPrompt, Prompt, TerminalPrompt};

use secrecy::SecretString;
use tbk_core::profile::SecretBackendKind;
use tbk_core::VaultResult;

/// Named secret storage for one profile
pub trait SecretStore {
    fn put(&self, name: &str, secret: &SecretString) -> VaultResult<()>;
    fn get(&self, name: &str) -> VaultResult<Option<SecretString>>;
    fn delete(&self, name: &str) -> VaultResult<()>;
}

/// Well-known secret names
pub mod names {
    /// S3 secret access key of the profile's remote
    pub const S3_SECRET_ACCESS_KEY: &str = "s3-secret-access-key";
}

/// Choose the backend for a new profile: the keychain when a write/read/delete
/// probe succeeds, the encrypted file otherwise.
pub fn select_backend(profile: &str) -> SecretBackendKind {
    if KeyringStore::new(profile).probe() {
        tracing::debug!(profile, "platform keychain available");
        SecretBackendKind::Keyring
    } else {
        tracing::info!(profile, "platform keychain unavailable, using encrypted file store");
        SecretBackendKind::EncryptedFile
    }
}

/// Open the backend a profile chose at `init`.
pub fn open_store(
    kind: SecretBackendKind,
    profile: &str,
    state_dir: &std::path::Path,
    master: &tbk_crypto::MasterKey,
) -> VaultResult<Box<dyn SecretStore>> {
    Ok(match kind {
        SecretBackendKind::Keyring => Box::new(KeyringStore::new(profile)),
        SecretBackendKind::EncryptedFile => {
            Box::new(EncryptedFileStore::open(state_dir, profile, master)?)
        }
    })
}
