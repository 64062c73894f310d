//! Cold persistence capability
//!
//! The durable tier of conversation storage: a blob/object store keyed by
//! chat ID. Concrete backends (cloud object stores, filesystems) live
//! outside this crate behind the [`ColdStore`] trait.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors from persistence backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Configuration for the cold persistence tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub account: String,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_folder")]
    pub folder: String,
    /// Background flush schedule expression; `ttl+N` flushes a chat once
    /// less than N seconds of cache TTL remain
    #[serde(default = "default_schedule")]
    pub schedule: String,
}

fn default_container() -> String {
    "conversations".to_string()
}

fn default_folder() -> String {
    "threads".to_string()
}

fn default_schedule() -> String {
    "ttl+300".to_string()
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            account: String::new(),
            container: default_container(),
            folder: default_folder(),
            schedule: default_schedule(),
        }
    }
}

/// Cold object store capability
#[async_trait::async_trait]
pub trait ColdStore: Send + Sync {
    /// Read a blob by key
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a blob
    async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Delete a blob; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// List stored keys, up to `limit`
    async fn list(&self, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Close the backend connection
    async fn close(&self) -> Result<(), StoreError>;
}

/// Parse a persist schedule expression into `persist_at` seconds
///
/// Recognized forms: `ttl+N` (whitespace tolerated) and bare `N`, meaning
/// "flush when less than N seconds of TTL remain". Any other form is a
/// configuration error; no other grammar is guessed.
pub fn parse_schedule(schedule: &str) -> Result<u64, String> {
    let trimmed = schedule.trim();

    if let Some(rest) = trimmed.strip_prefix("ttl") {
        let rest = rest.trim_start();
        if let Some(seconds) = rest.strip_prefix('+') {
            return seconds
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("invalid persist schedule '{}'", schedule));
        }
        return Err(format!("invalid persist schedule '{}'", schedule));
    }

    trimmed
        .parse::<u64>()
        .map_err(|_| format!("invalid persist schedule '{}'", schedule))
}
