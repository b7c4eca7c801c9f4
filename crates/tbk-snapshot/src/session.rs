//! Key material for one unlocked engine session

use tbk_chunks::ChunkHasher;
use tbk_core::VaultResult;
use tbk_crypto::keys::derive_chunk_id_key;
use tbk_crypto::{KeyVault, MasterKey, PublicKey, SigningKeyPair};

/// A master key proven to open the vault, plus what the engines derive from
/// it. Dropping it wipes every secret.
pub struct UnlockedVault {
    master: MasterKey,
    signing: SigningKeyPair,
    public_key: PublicKey,
    hasher: ChunkHasher,
}

impl UnlockedVault {
    /// Unwraps the signing key with `master`. A master key derived from the
    /// wrong password fails here with `VaultError::Authentication`, before
    /// any remote access.
    pub fn open(vault: &KeyVault, master: MasterKey) -> VaultResult<Self> {
        let signing = vault.signing_keypair(&master)?;
        let hasher = ChunkHasher::new(derive_chunk_id_key(&master)?);
        Ok(Self {
            public_key: signing.public_key(),
            master,
            signing,
            hasher,
        })
    }

    pub fn master(&self) -> &MasterKey {
        &self.master
    }

    pub fn signing(&self) -> &SigningKeyPair {
        &self.signing
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn hasher(&self) -> &ChunkHasher {
        &self.hasher
    }
}

impl std::fmt::Debug for UnlockedVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedVault")
            .field("public_key", &self.public_key.to_base64())
            .finish_non_exhaustive()
    }
}
