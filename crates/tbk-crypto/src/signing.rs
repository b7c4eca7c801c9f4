//! Ed25519 manifest signing
//!
//! Ed25519 signatures are deterministic: signing identical bytes twice with
//! the same key yields identical signatures.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use tbk_core::{VaultError, VaultResult};
use zeroize::Zeroizing;

use crate::{b64_decode, b64_encode, SIGNATURE_SIZE};

/// Per-profile signing keypair. The secret half zeroizes on drop.
pub struct SigningKeyPair {
    signing: SigningKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut seed[..]);
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &self.public_key().to_base64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VaultError::Profile(format!("public key must be 32 bytes, got {}", bytes.len())))?;
        VerifyingKey::from_bytes(&arr)
            .map(Self)
            .map_err(|e| VaultError::Profile(format!("invalid public key: {e}")))
    }

    pub fn from_base64(encoded: &str) -> VaultResult<Self> {
        Self::from_bytes(&b64_decode("public key", encoded)?)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn to_base64(&self) -> String {
        b64_encode(&self.0.to_bytes())
    }

    /// Strict verification; malformed signatures simply fail.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; SIGNATURE_SIZE]>::try_from(signature) else {
            return false;
        };
        let sig = Signature::from_bytes(&bytes);
        self.0.verify_strict(message, &sig).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(b"manifest body");
        assert!(pair.public_key().verify(b"manifest body", &sig));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let pair = SigningKeyPair::from_seed(&[9u8; 32]);
        assert_eq!(pair.sign(b"same bytes"), pair.sign(b"same bytes"));
    }

    #[test]
    fn test_verify_rejects_modified_message() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign(b"manifest body");
        assert!(!pair.public_key().verify(b"manifest bodY", &sig));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let a = SigningKeyPair::generate();
        let b = SigningKeyPair::generate();
        let sig = a.sign(b"msg");
        assert!(!b.public_key().verify(b"msg", &sig));
    }

    #[test]
    fn test_verify_rejects_malformed_signature() {
        let pair = SigningKeyPair::generate();
        assert!(!pair.public_key().verify(b"msg", &[0u8; 10]));
    }

    #[test]
    fn test_seed_roundtrip() {
        let pair = SigningKeyPair::generate();
        let restored = SigningKeyPair::from_seed(&pair.seed());
        assert_eq!(pair.public_key(), restored.public_key());
    }

    #[test]
    fn test_public_key_base64_roundtrip() {
        let pk = SigningKeyPair::generate().public_key();
        assert_eq!(PublicKey::from_base64(&pk.to_base64()).unwrap(), pk);
        assert!(PublicKey::from_base64("c2hvcnQ=").is_err());
    }
}
