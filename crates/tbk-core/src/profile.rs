//! Vault profiles: one JSON record per vault under `<state_dir>/profiles/`.
//!
//! A profile holds everything needed to reopen a vault except secrets:
//! the KDF salt and parameters, the recovery-wrapped master key, the
//! master-wrapped signing key, and the public verification key. All key
//! material is stored base64-encoded and already encrypted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VaultError, VaultResult};
use crate::types::KdfParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub source_dir: PathBuf,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Unix timestamp of `init`
    pub created_at: u64,
    pub secret_backend: SecretBackendKind,
    pub keys: ProfileKeys,
}

/// Where a vault's blobs live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub backend: RemoteBackend,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    /// Root directory for the `fs` backend
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Key prefix inside the bucket/root (defaults to the profile name)
    pub prefix: String,
    /// S3 access key id; the secret half lives in the profile's SecretStore
    #[serde(default)]
    pub access_key_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    S3,
    Fs,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretBackendKind {
    Keyring,
    EncryptedFile,
}

/// Wrapped key material (all values base64)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKeys {
    pub kdf: KdfParams,
    /// 16-byte Argon2id salt
    pub salt: String,
    /// Master key sealed under the recovery-phrase key
    pub recovery_wrapped_master: String,
    /// Ed25519 seed sealed under a master-derived key
    pub wrapped_signing_key: String,
    /// Ed25519 verifying key
    pub public_key: String,
}

/// Profile names become file names and remote prefixes.
pub fn validate_name(name: &str) -> VaultResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(VaultError::Profile(format!(
            "invalid profile name '{name}': use letters, digits, '-' or '_'"
        )))
    }
}

/// JSON-backed profile registry
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// `state_dir` is the tbk state root; profiles live in `state_dir/profiles`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("profiles"),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).exists()
    }

    pub fn load(&self, name: &str) -> VaultResult<Profile> {
        validate_name(name)?;
        let path = self.path_for(name);
        if !path.exists() {
            return Err(VaultError::ProfileNotFound(name.to_string()));
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| VaultError::Profile(format!("parsing {}: {e}", path.display())))
    }

    /// Write the profile atomically with owner-only permissions.
    pub fn save(&self, profile: &Profile) -> VaultResult<()> {
        validate_name(&profile.name)?;
        std::fs::create_dir_all(&self.dir)?;

        let json = serde_json::to_vec_pretty(profile)
            .map_err(|e| VaultError::Profile(format!("serializing profile: {e}")))?;
        let path = self.path_for(&profile.name);
        crate::atomic::write_private(&path, &json)?;
        tracing::debug!(profile = %profile.name, path = %path.display(), "profile saved");
        Ok(())
    }

    /// Profile names, sorted
    pub fn list(&self) -> VaultResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> VaultResult<()> {
        validate_name(name)?;
        let path = self.path_for(name);
        if !path.exists() {
            return Err(VaultError::ProfileNotFound(name.to_string()));
        }
        std::fs::remove_file(&path)?;
        tracing::info!(profile = name, "profile deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> Profile {
        Profile {
            name: name.to_string(),
            source_dir: PathBuf::from("/home/user/docs"),
            remote: RemoteConfig {
                backend: RemoteBackend::Fs,
                endpoint: None,
                region: None,
                bucket: None,
                root: Some(PathBuf::from("/mnt/backup")),
                prefix: name.to_string(),
                access_key_id: None,
            },
            exclude_patterns: vec!["*.tmp".into()],
            created_at: 1_700_000_000,
            secret_backend: SecretBackendKind::EncryptedFile,
            keys: ProfileKeys {
                kdf: KdfParams::default(),
                salt: "c2FsdA==".into(),
                recovery_wrapped_master: "cmVj".into(),
                wrapped_signing_key: "c2ln".into(),
                public_key: "cHVi".into(),
            },
        }
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("work_docs-2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("has space").is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());

        store.save(&sample("docs")).unwrap();
        let loaded = store.load("docs").unwrap();

        assert_eq!(loaded.name, "docs");
        assert_eq!(loaded.remote.backend, RemoteBackend::Fs);
        assert_eq!(loaded.keys, sample("docs").keys);
        assert_eq!(loaded.exclude_patterns, vec!["*.tmp".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_profile_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        store.save(&sample("docs")).unwrap();

        let mode = std::fs::metadata(tmp.path().join("profiles/docs.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_resave_leaves_only_the_record() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        let mut profile = sample("docs");
        store.save(&profile).unwrap();
        profile.exclude_patterns = vec!["*.log".into()];
        store.save(&profile).unwrap();

        let files: Vec<_> = std::fs::read_dir(tmp.path().join("profiles"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files, vec!["docs.json"]);
        assert_eq!(store.load("docs").unwrap().exclude_patterns, vec!["*.log"]);
    }

    #[test]
    fn test_list_and_delete() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        assert!(store.list().unwrap().is_empty());

        store.save(&sample("zeta")).unwrap();
        store.save(&sample("alpha")).unwrap();
        assert_eq!(store.list().unwrap(), vec!["alpha", "zeta"]);

        store.delete("zeta").unwrap();
        assert_eq!(store.list().unwrap(), vec!["alpha"]);
        assert!(matches!(
            store.delete("zeta"),
            Err(VaultError::ProfileNotFound(_))
        ));
    }

    #[test]
    fn test_load_missing_profile() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ProfileStore::new(tmp.path());
        assert!(matches!(
            store.load("nope"),
            Err(VaultError::ProfileNotFound(_))
        ));
    }
}
