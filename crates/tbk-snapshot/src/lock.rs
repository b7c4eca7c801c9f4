//! Profile-scoped exclusive lock
//!
//! An advisory `flock`-style lock on `<state_dir>/locks/<profile>.lock`. The
//! OS drops it when the process exits, so a crashed snapshot never leaves a
//! stale lock behind.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tbk_core::{VaultError, VaultResult};

#[derive(Debug)]
pub struct ProfileLock {
    file: File,
    path: PathBuf,
}

impl ProfileLock {
    /// Take the lock without waiting. A held lock is
    /// [`VaultError::LockContention`].
    pub fn acquire(state_dir: &Path, profile: &str) -> VaultResult<Self> {
        let dir = state_dir.join("locks");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{profile}.lock"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(VaultError::LockContention(profile.to_string()));
            }
            return Err(e.into());
        }
        tracing::debug!(path = %path.display(), "profile lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "releasing profile lock");
        }
    }
}
