//! OAuth token provider for the ERP tool server
//!
//! Caches a bearer token and refreshes it before expiry. Acquisition is
//! single-flight: concurrent callers needing a fresh token queue on one
//! lock and the winner's token serves them all (double-checked). Transient
//! credential failures are retried with exponential backoff; anything else
//! propagates immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::ErpError;

/// A bearer token with its expiry
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// External credential capability
///
/// Concrete implementations bind to an identity platform; the provider
/// only needs `get_token(scope)`.
#[async_trait::async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self, scope: &str) -> Result<AccessToken, ErpError>;
}

const ACQUIRE_ATTEMPTS: usize = 3;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 10;

/// Acquires, caches, and refreshes ERP bearer tokens
pub struct ErpTokenProvider {
    credential: Arc<dyn TokenCredential>,
    scope: String,
    refresh_buffer: chrono::Duration,
    cached: RwLock<Option<AccessToken>>,
    /// Single-flight lock: at most one acquisition in flight
    refresh_lock: Mutex<()>,
}

impl ErpTokenProvider {
    /// Create a provider for the given scope
    ///
    /// `refresh_buffer_secs` is how long before expiry a cached token is
    /// already considered stale.
    pub fn new(
        credential: Arc<dyn TokenCredential>,
        scope: impl Into<String>,
        refresh_buffer_secs: i64,
    ) -> Self {
        let scope = scope.into();
        tracing::debug!(scope = %scope, "ERP token provider initialized");
        Self {
            credential,
            scope,
            refresh_buffer: chrono::Duration::seconds(refresh_buffer_secs),
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// The OAuth scope this provider acquires tokens for
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Expiry of the currently cached token, if any
    pub fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.cached.read().as_ref().map(|t| t.expires_at)
    }

    /// Whether a token is currently cached
    pub fn is_token_cached(&self) -> bool {
        self.cached.read().is_some()
    }

    /// Get a bearer token, acquiring a new one if the cache is stale
    pub async fn get_token(&self) -> Result<String, ErpError> {
        // Quick check without the acquisition lock.
        if let Some(token) = self.valid_cached() {
            tracing::debug!("using cached ERP token");
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Double-check after acquiring the lock; another caller may have
        // refreshed while we waited.
        if let Some(token) = self.valid_cached() {
            return Ok(token);
        }

        self.acquire_with_retry().await
    }

    /// Invalidate the cached token and acquire a new one
    pub async fn refresh_token(&self) -> Result<String, ErpError> {
        let _guard = self.refresh_lock.lock().await;
        *self.cached.write() = None;
        self.acquire_with_retry().await
    }

    /// Drop any cached token
    pub fn close(&self) {
        *self.cached.write() = None;
    }

    fn valid_cached(&self) -> Option<String> {
        let cached = self.cached.read();
        let token = cached.as_ref()?;
        let threshold = token.expires_at - self.refresh_buffer;
        (Utc::now() < threshold).then(|| token.token.clone())
    }

    /// Acquire with exponential backoff for transient failures only.
    /// Callers hold the refresh lock.
    async fn acquire_with_retry(&self) -> Result<String, ErpError> {
        let mut last_error = None;

        for attempt in 0..ACQUIRE_ATTEMPTS {
            match self.credential.get_token(&self.scope).await {
                Ok(token) => {
                    tracing::info!(
                        scope = %self.scope,
                        expires_at = %token.expires_at,
                        "acquired ERP OAuth token"
                    );
                    let value = token.token.clone();
                    *self.cached.write() = Some(token);
                    return Ok(value);
                }
                Err(err @ ErpError::Transient(_)) => {
                    if attempt + 1 < ACQUIRE_ATTEMPTS {
                        let backoff = (BACKOFF_BASE_SECS << attempt).min(BACKOFF_CAP_SECS);
                        tracing::warn!(
                            attempt = attempt + 1,
                            backoff_secs = backoff,
                            error = %err,
                            "token acquisition failed, retrying"
                        );
                        last_error = Some(err);
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }
                    last_error = Some(err);
                }
                Err(err) => {
                    tracing::error!(scope = %self.scope, error = %err, "failed to acquire ERP token");
                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ErpError::Transient("token acquisition failed".into())))
    }
}
