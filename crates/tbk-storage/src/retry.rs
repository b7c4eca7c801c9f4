//! Bounded exponential backoff for transient remote faults
//!
//! Retrying happens inside the operator stack via OpenDAL's [`RetryLayer`].
//! Once the layer gives up, the error it returns is marked persistent; the
//! store maps that back onto the vault taxonomy (see `remote.rs`).

use std::time::Duration;

use opendal::layers::{RetryInterceptor, RetryLayer};
use opendal::ErrorKind;
use tbk_core::config::StorageConfig;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after each failure
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &StorageConfig) -> Self {
        Self {
            max_attempts: cfg.max_retries.max(1),
            base_delay: Duration::from_millis(cfg.retry_base_delay_ms),
        }
    }

    fn max_delay(&self) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << self.max_attempts.saturating_sub(1).min(16))
            .max(self.base_delay)
    }

    /// The OpenDAL layer enforcing this policy. Every retry is logged.
    pub fn layer(&self) -> RetryLayer<impl RetryInterceptor> {
        RetryLayer::new()
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay())
            .with_factor(2.0)
            .with_jitter()
            .with_notify(|err: &opendal::Error, delay: Duration| {
                tracing::warn!(?delay, error = %err, "transient remote error, retrying");
            })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// Whether an OpenDAL error is a transient fault, or one that stayed
/// transient until the retry layer gave up on it.
///
/// The retry layer marks every error it returns as persistent, so the kind
/// is what separates exhausted 5xx/throttling/network faults from terminal
/// ones like a denied request.
pub(crate) fn is_retryable(e: &opendal::Error) -> bool {
    e.is_temporary()
        || (e.is_persistent() && matches!(e.kind(), ErrorKind::Unexpected | ErrorKind::RateLimited))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opendal::Error;

    #[test]
    fn test_policy_from_config() {
        let cfg = StorageConfig {
            max_retries: 0,
            retry_base_delay_ms: 50,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&cfg);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_backoff_ceiling_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.max_delay(), Duration::from_millis(800));

        let single = RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(single.max_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_retryable_classification() {
        let unavailable = || Error::new(ErrorKind::Unexpected, "503 service unavailable");
        assert!(is_retryable(&unavailable().set_temporary()));
        assert!(is_retryable(&unavailable().set_persistent()));
        assert!(is_retryable(
            &Error::new(ErrorKind::RateLimited, "slow down").set_persistent()
        ));

        assert!(!is_retryable(&unavailable()));
        assert!(!is_retryable(
            &Error::new(ErrorKind::PermissionDenied, "403").set_persistent()
        ));
        assert!(!is_retryable(&Error::new(ErrorKind::NotFound, "404")));
    }
}
