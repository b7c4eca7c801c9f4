//! tbk-crypto: client-side cryptography for tbk vaults
//!
//! Every blob that leaves the machine is sealed with XChaCha20-Poly1305.
//!
//! Key hierarchy:
//! ```text
//! Recovery Secret (256-bit random, shown once as 24 BIP-39 words)
//!   └── Recovery Wrap Key (HKDF, domain="tbk-recovery-wrap") ── seals ──┐
//!                                                                        ▼
//! Master Key (256-bit, Argon2id(password, per-profile salt))
//!   ├── Signing Wrap Key (HKDF, domain="tbk-signing-key")
//!   │   └── Ed25519 seed (sealed at rest in the profile)
//!   ├── Chunk Id Key (HKDF, domain="tbk-chunk-id") → keyed BLAKE3 chunk ids
//!   ├── Secret Store Key (HKDF, domain="tbk-secret-store")
//!   └── Data Encryption Key (per snapshot, random, wrapped with AAD=snapshot id)
//!       └── Chunk AEAD (AAD = chunk id) and manifest contents
//! ```

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod recovery;
pub mod signing;
pub mod vault;

pub use aead::{decrypt, encrypt};
pub use kdf::{derive_master_key, MasterKey};
pub use keys::{generate_data_key, unwrap_dek, wrap_dek, DataKey};
pub use signing::{PublicKey, SigningKeyPair};
pub use vault::{check_password, InitializedVault, KeyVault};

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use tbk_core::{VaultError, VaultResult};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of the Argon2id salt
pub const SALT_SIZE: usize = 16;

/// Size of an Ed25519 signature
pub const SIGNATURE_SIZE: usize = 64;

pub fn b64_encode(data: &[u8]) -> String {
    B64.encode(data)
}

pub fn b64_decode(what: &str, data: &str) -> VaultResult<Vec<u8>> {
    B64.decode(data)
        .map_err(|e| VaultError::Profile(format!("{what}: invalid base64: {e}")))
}
