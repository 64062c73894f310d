//! Shared test fixtures for integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use maestro_core::memory::persistence::StoreError;
use maestro_core::{ColdStore, Message, ModelResponse, ProviderError, StopReason, ToolDefinition};
use maestro_core::{ChatModel, ContentBlock, Role};

/// A mock chat model returning pre-programmed responses in order.
#[derive(Clone, Default)]
pub struct MockModel {
    responses: Arc<Mutex<Vec<Result<ModelResponse, String>>>>,
    call_count: Arc<AtomicUsize>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text response with `StopReason::EndTurn`.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.responses.lock().push(Ok(ModelResponse {
            message: Message::assistant(text),
            stop_reason: StopReason::EndTurn,
            usage: None,
        }));
        self
    }

    /// Queue a tool use response with `StopReason::ToolUse`.
    pub fn with_tool_use(self, tool_name: impl Into<String>, input: Value) -> Self {
        let tool_use = maestro_core::types::ToolUseBlock {
            id: format!("tool_{}", self.responses.lock().len()),
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

    /// Queue a permanent model failure.
    pub fn failing(self, message: impl Into<String>) -> Self {
        self.responses.lock().push(Err(message.into()));
        self
    }

    /// How many times `generate` has been called.
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

/// In-memory cold store.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
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
