pub mod atomic;
pub mod config;
pub mod error;
pub mod profile;
pub mod types;

pub use error::{VaultError, VaultResult};
pub use profile::{Profile, ProfileStore};
pub use types::{Diff, KdfParams};

use std::path::PathBuf;

/// Default tbk config directory (`$XDG_CONFIG_HOME/tbk`, falling back to `~/.config/tbk`)
pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".config")
        })
        .join("tbk")
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
