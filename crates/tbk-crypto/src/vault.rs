//! KeyVault: master-key lifecycle for one profile
//!
//! `unlock` cannot tell a wrong password from a right one. Argon2id is
//! deterministic, so a wrong password simply yields a different key, and the
//! mistake surfaces at the first decryption that uses it (the signing-key
//! unwrap or a DEK unwrap) as [`VaultError::Authentication`].

use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use tbk_core::config::PasswordPolicy;
use tbk_core::profile::ProfileKeys;
use tbk_core::{KdfParams, VaultError, VaultResult};
use zeroize::Zeroizing;

use crate::kdf::{derive_master_key, MasterKey};
use crate::keys::derive_signing_wrap_key;
use crate::recovery::{decode_phrase, generate_phrase, RecoverySecret};
use crate::signing::{PublicKey, SigningKeyPair};
use crate::{aead, b64_decode, b64_encode, KEY_SIZE, SALT_SIZE};

const SIGNING_AAD: &[u8] = b"tbk-signing-seed";
const RECOVERY_AAD: &[u8] = b"tbk-master-recovery";

/// Everything produced by [`KeyVault::initialize`]. The phrase must be shown
/// to the user once and then dropped.
#[derive(Debug)]
pub struct InitializedVault {
    pub vault: KeyVault,
    pub master: MasterKey,
    pub phrase: SecretString,
    pub signing: SigningKeyPair,
}

/// Check a password against the configured strength floor.
pub fn check_password(password: &SecretString, policy: &PasswordPolicy) -> VaultResult<()> {
    let pw = password.expose_secret();
    let length = pw.chars().count();
    if length < policy.min_length {
        return Err(VaultError::WeakPassword(format!(
            "must be at least {} characters (got {length})",
            policy.min_length
        )));
    }

    let classes = [
        pw.chars().any(|c| c.is_lowercase()),
        pw.chars().any(|c| c.is_uppercase()),
        pw.chars().any(|c| c.is_ascii_digit()),
        pw.chars().any(|c| !c.is_alphanumeric()),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    if classes < policy.min_classes {
        return Err(VaultError::WeakPassword(format!(
            "must mix at least {} of lowercase, uppercase, digits, symbols",
            policy.min_classes
        )));
    }
    Ok(())
}

/// Key material of one profile, as persisted in [`ProfileKeys`].
#[derive(Debug, Clone)]
pub struct KeyVault {
    keys: ProfileKeys,
}

impl KeyVault {
    pub fn new(keys: ProfileKeys) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &ProfileKeys {
        &self.keys
    }

    /// Create the key hierarchy for a new profile.
    pub fn initialize(
        password: &SecretString,
        params: &KdfParams,
        policy: &PasswordPolicy,
    ) -> VaultResult<InitializedVault> {
        check_password(password, policy)?;

        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let master = derive_master_key(password, &salt, params)?;

        let (phrase, recovery) = generate_phrase()?;
        let recovery_wrapped_master = seal_master(&master, &recovery)?;

        let signing = SigningKeyPair::generate();
        let wrap_key = derive_signing_wrap_key(&master)?;
        let wrapped_signing_key = aead::encrypt(&wrap_key, &signing.seed()[..], SIGNING_AAD)?;

        let keys = ProfileKeys {
            kdf: *params,
            salt: b64_encode(&salt),
            recovery_wrapped_master,
            wrapped_signing_key: b64_encode(&wrapped_signing_key),
            public_key: signing.public_key().to_base64(),
        };
        tracing::info!(public_key = %keys.public_key, "initialized key vault");

        Ok(InitializedVault {
            vault: Self { keys },
            master,
            phrase,
            signing,
        })
    }

    /// Re-derive the master key from the password.
    ///
    /// Succeeds for any password; see the module docs.
    pub fn unlock(&self, password: &SecretString) -> VaultResult<MasterKey> {
        let salt: [u8; SALT_SIZE] = b64_decode("salt", &self.keys.salt)?
            .try_into()
            .map_err(|_| VaultError::Profile(format!("salt must be {SALT_SIZE} bytes")))?;
        derive_master_key(password, &salt, &self.keys.kdf)
    }

    /// Reconstruct the master key from the recovery phrase.
    pub fn recover(&self, phrase: &SecretString) -> VaultResult<MasterKey> {
        let recovery = decode_phrase(phrase)?;
        let wrap_key = recovery.wrap_key()?;
        let sealed = b64_decode("recovery-wrapped master key", &self.keys.recovery_wrapped_master)?;

        let plaintext = Zeroizing::new(aead::decrypt(&wrap_key, &sealed, RECOVERY_AAD).map_err(
            |_| VaultError::Authentication("recovery phrase does not belong to this vault".into()),
        )?);
        let bytes: [u8; KEY_SIZE] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::Authentication("recovered key has wrong size".into()))?;

        tracing::info!("master key recovered from phrase");
        Ok(MasterKey::from_bytes(bytes))
    }

    /// Unwrap the signing key. This is the first point at which a wrong
    /// password is detected.
    pub fn signing_keypair(&self, master: &MasterKey) -> VaultResult<SigningKeyPair> {
        let wrap_key = derive_signing_wrap_key(master)?;
        let sealed = b64_decode("wrapped signing key", &self.keys.wrapped_signing_key)?;
        let seed = Zeroizing::new(aead::decrypt(&wrap_key, &sealed, SIGNING_AAD).map_err(
            |_| VaultError::Authentication("wrong password or recovery phrase".into()),
        )?);
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
            seed.as_slice()
                .try_into()
                .map_err(|_| VaultError::Authentication("signing seed has wrong size".into()))?,
        );

        let pair = SigningKeyPair::from_seed(&seed);
        if pair.public_key() != self.public_key()? {
            return Err(VaultError::Profile(
                "signing key does not match stored public key".into(),
            ));
        }
        Ok(pair)
    }

    pub fn public_key(&self) -> VaultResult<PublicKey> {
        PublicKey::from_base64(&self.keys.public_key)
    }

    /// Issue a new recovery phrase; the previous phrase stops working once
    /// the updated keys are persisted.
    pub fn rotate_recovery(&mut self, master: &MasterKey) -> VaultResult<SecretString> {
        // Refuse to seal a master key that cannot open this vault.
        self.signing_keypair(master)?;

        let (phrase, recovery) = generate_phrase()?;
        self.keys.recovery_wrapped_master = seal_master(master, &recovery)?;
        tracing::info!("recovery phrase rotated");
        Ok(phrase)
    }
}

fn seal_master(master: &MasterKey, recovery: &RecoverySecret) -> VaultResult<String> {
    let wrap_key = recovery.wrap_key()?;
    let sealed = aead::encrypt(&wrap_key, master.as_bytes(), RECOVERY_AAD)?;
    Ok(b64_encode(&sealed))
}
