//! Shared retry logic for transient model errors
//!
//! Exponential backoff for connection and timeout failures. Permanent
//! errors (authentication, configuration, model-side rejections) fail
//! immediately.

use super::ProviderError;
use std::time::Duration;

/// Configuration for retry behavior on transient errors
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default: 3)
    pub max_attempts: usize,
    /// Base delay in milliseconds for exponential backoff (default: 1000ms)
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds (default: 10000ms)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Determine if an error is transient and should be retried
///
/// Only connection-level failures count: network errors, timeouts, and
/// temporary unavailability. Rate limiting at the model backend is also
/// retried since it clears on its own.
pub fn is_retryable_error(err: &ProviderError) -> bool {
    match err {
        ProviderError::Network(_) => true,
        ProviderError::Timeout(_) => true,
        ProviderError::ServiceUnavailable(_) => true,
        ProviderError::RateLimited(_) => true,

        ProviderError::Authentication(_) => false,
        ProviderError::Configuration(_) => false,
        ProviderError::Model(_) => false,
        ProviderError::Other(_) => false,
    }
}

/// Calculate backoff delay for a given attempt (1-based)
pub fn backoff_delay(attempt: usize, config: &RetryConfig) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(10) as u32;
    let exp = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay = config
        .base_delay_ms
        .saturating_mul(exp)
        .min(config.max_delay_ms);
    Duration::from_millis(delay)
}

/// Retry an async operation with exponential backoff
///
/// Only retries on transient errors; everything else surfaces immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    mut op: F,
    config: &RetryConfig,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt >= config.max_attempts || !is_retryable_error(&err) {
                    return Err(err);
                }
                let delay = backoff_delay(attempt, config);
                tracing::warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient model error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.max_delay_ms, 10_000);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_error(&ProviderError::Network("reset".into())));
        assert!(is_retryable_error(&ProviderError::Timeout("60s".into())));
        assert!(is_retryable_error(&ProviderError::ServiceUnavailable(
            "503".into()
        )));
        assert!(is_retryable_error(&ProviderError::RateLimited(
            "throttled".into()
        )));

        assert!(!is_retryable_error(&ProviderError::Authentication(
            "expired".into()
        )));
        assert!(!is_retryable_error(&ProviderError::Configuration(
            "bad id".into()
        )));
        assert!(!is_retryable_error(&ProviderError::Model(
            "filtered".into()
        )));
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(1, &config), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(3, &config), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(10, &config), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        };

        let result = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::Network("reset".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
            &config,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1,
            max_delay_ms: 5,
        };

        let result: Result<(), _> = retry_with_backoff(
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Authentication("nope".into()))
                }
            },
            &config,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let config = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };

        let result: Result<(), _> = retry_with_backoff(
            || async { Err(ProviderError::Timeout("slow".into())) },
            &config,
        )
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
