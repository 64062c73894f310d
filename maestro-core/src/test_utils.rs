//! Test utilities
//!
//! Mock implementations of the external capabilities, so the orchestrator
//! and its subsystems can be exercised without a live model backend,
//! cache, object store, or identity platform.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! maestro-core = { version = "...", features = ["test-utils"] }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use crate::erp::{AccessToken, ErpError, TokenCredential};
use crate::memory::persistence::{ColdStore, StoreError};
use crate::model::{ChatModel, ModelResponse, ProviderError};
use crate::types::{ContentBlock, Message, Role, StopReason, ToolDefinition, ToolUseBlock};

/// A mock chat model returning pre-programmed responses in order
///
/// # Example
///
/// ```rust
/// use maestro_core::test_utils::MockModel;
/// use serde_json::json;
///
/// // Tool use followed by a final text response.
/// let model = MockModel::new()
///     .with_tool_use("weather_lookup", json!({"city": "Oslo"}))
///     .with_text("It is raining.");
/// ```
#[derive(Clone, Default)]
pub struct MockModel {
    responses: Arc<Mutex<Vec<Result<ModelResponse, String>>>>,
    call_count: Arc<AtomicUsize>,
    transient_failures: Arc<AtomicUsize>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text response with `StopReason::EndTurn`
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.responses.lock().push(Ok(ModelResponse {
            message: Message::assistant(text),
            stop_reason: StopReason::EndTurn,
            usage: None,
        }));
        self
    }

    /// Queue a tool use response with `StopReason::ToolUse`
    pub fn with_tool_use(self, tool_name: impl Into<String>, input: Value) -> Self {
        let tool_use = ToolUseBlock {
            id: format!("tool_{}", uuid::Uuid::new_v4()),
            name: tool_name.into(),
            input,
        };
        self.responses.lock().push(Ok(ModelResponse {
            message: Message::new(Role::Assistant, vec![ContentBlock::ToolUse(tool_use)]),
            stop_reason: StopReason::ToolUse,
            usage: None,
        }));
        self
    }

    /// Queue a permanent failure
    pub fn failing(self, message: impl Into<String>) -> Self {
        self.responses.lock().push(Err(message.into()));
        self
    }

    /// Fail the first `count` calls with a transient network error before
    /// serving the queued responses
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// How many times `generate` has been called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatModel for MockModel {
    fn name(&self) -> &str {
        "mock-model"
    }

    async fn generate(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
        _system_prompt: Option<String>,
    ) -> Result<ModelResponse, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Network("connection reset".to_string()));
        }

        let mut responses = self.responses.lock();
        if responses.is_empty() {
            return Ok(ModelResponse {
                message: Message::assistant("mock response"),
                stop_reason: StopReason::EndTurn,
                usage: None,
            });
        }
        match responses.remove(0) {
            Ok(response) => Ok(response),
            Err(message) => Err(ProviderError::Model(message)),
        }
    }
}

/// In-memory cold store
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl ColdStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.blobs.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.blobs.lock().remove(key).is_some())
    }

    async fn list(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.blobs.lock().keys().cloned().collect();
        keys.sort_unstable();
        keys.truncate(limit);
        Ok(keys)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A credential handing out sequentially numbered tokens
#[derive(Default)]
pub struct StaticCredential {
    calls: AtomicUsize,
    lifetime_secs: i64,
}

impl StaticCredential {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            lifetime_secs: 3600,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TokenCredential for StaticCredential {
    async fn get_token(&self, _scope: &str) -> Result<AccessToken, ErpError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AccessToken {
            token: format!("test-token-{}", call),
            expires_at: Utc::now() + chrono::Duration::seconds(self.lifetime_secs),
        })
    }
}
