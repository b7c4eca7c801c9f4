use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("password rejected by policy: {0}")]
    WeakPassword(String),

    #[error("KDF parameters below safety floor: {0}")]
    WeakParameter(String),

    #[error("invalid recovery phrase: {0}")]
    InvalidPhrase(String),

    /// AEAD tag mismatch: wrong key or tampered ciphertext
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Manifest framing or signature did not verify
    #[error("manifest {0} failed signature verification")]
    TamperedManifest(String),

    /// Content hash mismatch after decryption
    #[error("integrity check failed for {0}")]
    Integrity(String),

    #[error("chunk {0} missing from remote store")]
    ChunkMissing(String),

    #[error("upload of {key} failed after {attempts} attempts: {reason}")]
    UploadFailed {
        key: String,
        attempts: u32,
        reason: String,
    },

    #[error("another snapshot of profile '{0}' is in flight")]
    LockContention(String),

    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),

    #[error("malformed snapshot id '{0}'")]
    InvalidSnapshotId(String),

    #[error("profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("profile error: {0}")]
    Profile(String),

    #[error("refusing unsafe path in manifest: {0}")]
    PathTraversal(String),

    #[error("{0} changed while the snapshot was running")]
    SourceChanged(String),

    /// Remote fault worth retrying (timeouts, throttling, 5xx)
    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Whether a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::UploadFailed { .. })
    }

    /// Cryptographic verification failures. These must never be swallowed.
    pub fn is_crypto_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::TamperedManifest(_) | Self::Integrity(_)
        )
    }
}
