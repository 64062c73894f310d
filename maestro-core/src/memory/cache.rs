//! Hot cache capability
//!
//! The hot tier of conversation storage: a key-value store with TTL. The
//! production backend (e.g. Redis) lives outside this crate behind the
//! [`HotCache`] trait; [`InMemoryCache`] is the in-process fallback used
//! when no external cache is configured, and in tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from cache backends
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration for the hot cache tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    /// Entry TTL in seconds
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// Key prefix for chat entries
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub database: u8,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_ttl() -> u64 {
    3600
}

fn default_prefix() -> String {
    "chat:".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            tls: false,
            ttl: default_ttl(),
            prefix: default_prefix(),
            database: 0,
        }
    }
}

/// Hot cache capability: a TTL'd key-value store
///
/// Writes are last-writer-wins; merge logic belongs to the persistence
/// tier, never the cache.
#[async_trait::async_trait]
pub trait HotCache: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Set a value, with an optional TTL override
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    /// Delete a key
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remaining TTL in seconds, if the key exists and expires
    async fn ttl(&self, key: &str) -> Result<Option<u64>, CacheError>;

    /// List all live keys
    async fn scan(&self) -> Result<Vec<String>, CacheError>;

    /// Close the backend connection
    async fn close(&self) -> Result<(), CacheError>;
}

struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

/// In-process cache with per-entry TTL
pub struct InMemoryCache {
    default_ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    /// Create a cache whose entries expire after `ttl` by default
    pub fn new(ttl: Duration) -> Self {
        Self {
            default_ttl: ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, CacheEntry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a CacheEntry> {
        if let Some(entry) = entries.get(key) {
            if entry.expires_at.map(|at| at <= now).unwrap_or(false) {
                entries.remove(key);
                return None;
            }
        }
        entries.get(key)
    }
}

#[async_trait::async_trait]
impl HotCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key, Instant::now()).map(|e| e.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
        self.entries.lock().insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(Self::live(&mut entries, key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now).as_secs()))
    }

    async fn scan(&self) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.expires_at.map(|at| at > now).unwrap_or(true));
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.entries.lock().clear();
        Ok(())
    }
}
