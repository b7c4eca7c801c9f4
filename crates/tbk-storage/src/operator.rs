//! OpenDAL Operator factory for tbk remote backends

use opendal::{Builder, Operator};
use secrecy::{ExposeSecret, SecretString};
use tbk_core::config::StorageConfig;
use tbk_core::profile::{RemoteBackend, RemoteConfig};
use tbk_core::{VaultError, VaultResult};

use crate::remote::OpendalStore;
use crate::retry::RetryPolicy;

fn finish<B: Builder>(builder: B) -> VaultResult<Operator> {
    let op = Operator::new(builder)
        .map_err(|e| VaultError::Config(format!("creating OpenDAL operator: {e}")))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();
    Ok(op)
}

/// Build the operator for a profile's remote.
///
/// For S3, `secret_access_key` comes from the profile's SecretStore; when the
/// profile has no access key id, OpenDAL falls back to the usual AWS
/// environment variables. Plain-HTTP endpoints are refused when `enforce_tls`
/// is set and warned about otherwise.
pub fn build_operator(
    remote: &RemoteConfig,
    storage: &StorageConfig,
    secret_access_key: Option<&SecretString>,
) -> VaultResult<Operator> {
    match remote.backend {
        RemoteBackend::S3 => {
            let endpoint = remote.endpoint.as_deref().unwrap_or("https://s3.amazonaws.com");
            check_tls(endpoint, storage.enforce_tls)?;
            let bucket = remote
                .bucket
                .as_deref()
                .ok_or_else(|| VaultError::Config("s3 remote requires a bucket".into()))?;

            // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
            let mut builder = opendal::services::S3::default()
                .endpoint(endpoint)
                .region(remote.region.as_deref().unwrap_or("us-east-1"))
                .bucket(bucket);
            if let (Some(id), Some(secret)) = (&remote.access_key_id, secret_access_key) {
                builder = builder
                    .access_key_id(id)
                    .secret_access_key(secret.expose_secret());
            }
            finish(builder)
        }
        RemoteBackend::Fs => {
            let root = remote
                .root
                .as_ref()
                .ok_or_else(|| VaultError::Config("fs remote requires a root directory".into()))?;
            finish(opendal::services::Fs::default().root(&root.to_string_lossy()))
        }
        RemoteBackend::Memory => {
            tracing::warn!("memory remote is ephemeral; snapshots vanish when the process exits");
            finish(opendal::services::Memory::default())
        }
    }
}

/// The retrying store for a profile's remote, per `storage`'s retry policy.
pub fn connect(
    remote: &RemoteConfig,
    storage: &StorageConfig,
    secret_access_key: Option<&SecretString>,
) -> VaultResult<OpendalStore> {
    let op = build_operator(remote, storage, secret_access_key)?;
    Ok(OpendalStore::with_retry(op, &RetryPolicy::from_config(storage)))
}

fn check_tls(endpoint: &str, enforce_tls: bool) -> VaultResult<()> {
    if endpoint.starts_with("http://") {
        if enforce_tls {
            return Err(VaultError::Config(format!(
                "S3 endpoint uses plaintext HTTP ({endpoint}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development."
            )));
        }
        tracing::warn!(
            endpoint,
            "S3 endpoint uses plaintext HTTP; credentials are transmitted unencrypted"
        );
    }
    Ok(())
}
