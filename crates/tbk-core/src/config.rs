use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};
use crate::types::KdfParams;

/// Top-level configuration (loaded from `config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TbkConfig {
    pub logging: LoggingConfig,
    pub kdf: KdfParams,
    pub password: PasswordPolicy,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub paths: PathsConfig,
}

impl TbkConfig {
    /// Load config from a TOML file. A missing file yields defaults.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("{}: {e}", path.display())))
    }

    /// Directory that holds profiles, locks, the audit log, and the secret file.
    pub fn state_dir(&self) -> PathBuf {
        self.paths.state_dir.clone().unwrap_or_else(crate::config_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Password strength floor checked at `init`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    /// Distinct character classes required (lower, upper, digit, other)
    pub min_classes: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            min_classes: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parallel chunk workers (0 = available parallelism)
    pub concurrency: usize,
    /// Compress chunks with zstd before encryption
    pub compress: bool,
    /// zstd level (1-22)
    pub compression_level: i32,
}

impl EngineConfig {
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            compress: true,
            compression_level: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Attempts per remote call before giving up
    pub max_retries: u32,
    /// First backoff delay; doubled on each retry
    pub retry_base_delay_ms: u64,
    /// Refuse plain-HTTP S3 endpoints
    pub enforce_tls: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 200,
            enforce_tls: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Override for the state directory (default: `$XDG_CONFIG_HOME/tbk`)
    pub state_dir: Option<PathBuf>,
}
