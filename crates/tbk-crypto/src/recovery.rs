//! BIP-39 recovery phrase
//!
//! At `init` a uniformly random 256-bit recovery secret is drawn and shown to
//! the user once as 24 words. The profile stores the master key sealed under
//! a key derived from that secret, so the phrase alone reproduces the exact
//! master key bytes. The phrase is never stored digitally.

use bip39::Mnemonic;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use tbk_core::{VaultError, VaultResult};
use zeroize::Zeroizing;

use crate::keys::{hkdf_derive, labels};
use crate::KEY_SIZE;

/// Words in a recovery phrase (256 bits of entropy + 8-bit checksum)
pub const PHRASE_WORDS: usize = 24;

/// The 256-bit secret behind a recovery phrase. Zeroized on drop.
pub struct RecoverySecret(Zeroizing<[u8; KEY_SIZE]>);

impl RecoverySecret {
    /// Key that seals the master key in the profile.
    pub fn wrap_key(&self) -> VaultResult<Zeroizing<[u8; KEY_SIZE]>> {
        hkdf_derive(&self.0, labels::RECOVERY_WRAP)
    }
}

/// Draw a fresh recovery secret and its 24-word phrase.
pub fn generate_phrase() -> VaultResult<(SecretString, RecoverySecret)> {
    let mut entropy = Zeroizing::new([0u8; KEY_SIZE]);
    rand::thread_rng().fill_bytes(&mut entropy[..]);

    let mnemonic = Mnemonic::from_entropy(&entropy[..])
        .map_err(|e| VaultError::Other(anyhow::anyhow!("BIP-39 phrase generation failed: {e}")))?;

    Ok((
        SecretString::from(mnemonic.to_string()),
        RecoverySecret(entropy),
    ))
}

/// Decode a phrase back to its recovery secret.
///
/// Fails with [`VaultError::InvalidPhrase`] on a wrong word count, an unknown
/// word, or a checksum mismatch.
pub fn decode_phrase(phrase: &SecretString) -> VaultResult<RecoverySecret> {
    let normalized = Zeroizing::new(
        phrase
            .expose_secret()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" "),
    );

    let count = normalized.split(' ').filter(|w| !w.is_empty()).count();
    if count != PHRASE_WORDS {
        return Err(VaultError::InvalidPhrase(format!(
            "expected {PHRASE_WORDS} words, got {count}"
        )));
    }

    let mnemonic: Mnemonic = normalized
        .parse()
        .map_err(|e| VaultError::InvalidPhrase(format!("{e}")))?;

    let entropy = Zeroizing::new(mnemonic.to_entropy());
    let bytes: [u8; KEY_SIZE] = entropy
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::InvalidPhrase("unexpected entropy length".into()))?;

    Ok(RecoverySecret(Zeroizing::new(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_phrase() {
        let (phrase, _) = generate_phrase().unwrap();
        let word_count = phrase.expose_secret().split_whitespace().count();
        assert_eq!(word_count, PHRASE_WORDS, "BIP-39 phrase must have 24 words");
    }

    #[test]
    fn test_phrase_decode_roundtrip() {
        let (phrase, secret) = generate_phrase().unwrap();
        let decoded = decode_phrase(&phrase).unwrap();

        assert_eq!(*secret.0, *decoded.0, "decoded secret must match original");
        assert_eq!(*secret.wrap_key().unwrap(), *decoded.wrap_key().unwrap());
    }

    #[test]
    fn test_decode_tolerates_case_and_spacing() {
        let (phrase, secret) = generate_phrase().unwrap();
        let messy = SecretString::from(format!(
            "  {}  ",
            phrase.expose_secret().to_uppercase().replace(' ', "   ")
        ));
        assert_eq!(*decode_phrase(&messy).unwrap().0, *secret.0);
    }

    #[test]
    fn test_invalid_phrase() {
        let result = decode_phrase(&SecretString::from("not a valid phrase at all"));
        assert!(matches!(result, Err(VaultError::InvalidPhrase(_))));
    }

    #[test]
    fn test_checksum_mismatch() {
        // All-zero entropy encodes as 23 x "abandon" + "art"
        let valid = format!("{} art", vec!["abandon"; 23].join(" "));
        assert!(decode_phrase(&SecretString::from(valid)).is_ok());

        let bad_checksum = vec!["abandon"; 24].join(" ");
        let result = decode_phrase(&SecretString::from(bad_checksum));
        assert!(matches!(result, Err(VaultError::InvalidPhrase(_))));
    }

    #[test]
    fn test_twelve_words_rejected() {
        let twelve = "abandon abandon abandon abandon abandon abandon \
                      abandon abandon abandon abandon abandon about";
        let result = decode_phrase(&SecretString::from(twelve));
        assert!(matches!(result, Err(VaultError::InvalidPhrase(_))));
    }

    #[test]
    fn test_different_phrases_different_keys() {
        let (_, a) = generate_phrase().unwrap();
        let (_, b) = generate_phrase().unwrap();
        assert_ne!(*a.wrap_key().unwrap(), *b.wrap_key().unwrap());
    }
}
