//! Chat model capability
//!
//! This module contains the [`ChatModel`] trait, the inference capability
//! the core consumes. Concrete backends (hosted APIs, local inference) live
//! outside this crate; the orchestrator only needs `generate` and
//! `generate_stream` over provider-agnostic messages and tool definitions.

pub mod registry;
pub mod retry;

use futures::stream::BoxStream;

pub use registry::{ModelFactory, ModelProviderConfig, ModelRegistry, RegistryError};
pub use retry::{retry_with_backoff, RetryConfig};

use crate::types::{Message, StopReason, TokenUsage, ToolDefinition, ToolUseBlock};

/// Events from streaming model responses
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text delta
    TextDelta(String),
    /// Tool use detected
    ToolUse(ToolUseBlock),
    /// Streaming stopped
    Stop {
        stop_reason: StopReason,
        usage: Option<TokenUsage>,
    },
}

/// A complete model response
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// The assistant message produced by the model
    pub message: Message,
    /// Why the model stopped
    pub stop_reason: StopReason,
    /// Token usage for this response (if the backend reports it)
    pub usage: Option<TokenUsage>,
}

/// Error types for model backends
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Authentication or authorization failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting or throttling
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Network or connectivity issues
    #[error("Network error: {0}")]
    Network(String),

    /// Request or connection timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Model-side errors (content filtered, context too long, etc.)
    #[error("Model error: {0}")]
    Model(String),

    /// Service unavailable or temporary issues
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Invalid configuration (bad model ID, missing parameters, etc.)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Other backend-specific errors
    #[error("{0}")]
    Other(String),
}

/// The inference capability consumed by the agent loop
///
/// Implementations bind to a concrete LM backend. The default
/// `generate_stream` buffers a `generate` call into a three-event stream,
/// so non-streaming backends work everywhere streaming is requested.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Model name for display and response metadata
    fn name(&self) -> &str;

    /// Estimate token count for text
    ///
    /// Default implementation uses the ~4 characters per token heuristic.
    fn estimate_token_count(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }

    /// Send a request to the model and get a complete response
    async fn generate(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        system_prompt: Option<String>,
    ) -> Result<ModelResponse, ProviderError>;

    /// Send a request and stream the response incrementally
    async fn generate_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        system_prompt: Option<String>,
    ) -> Result<BoxStream<'static, Result<StreamEvent, ProviderError>>, ProviderError> {
        let response = self.generate(messages, tools, system_prompt).await?;

        let mut events = Vec::new();
        let text = response.message.text();
        if !text.is_empty() {
            events.push(Ok(StreamEvent::TextDelta(text)));
        }
        for tool_use in response.message.tool_uses() {
            events.push(Ok(StreamEvent::ToolUse(tool_use.clone())));
        }
        events.push(Ok(StreamEvent::Stop {
            stop_reason: response.stop_reason,
            usage: response.usage,
        }));

        Ok(Box::pin(futures::stream::iter(events)))
    }
}

impl std::fmt::Debug for dyn ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel").field("name", &self.name()).finish()
    }
}

#[async_trait::async_trait]
impl ChatModel for std::sync::Arc<dyn ChatModel> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn estimate_token_count(&self, text: &str) -> usize {
        (**self).estimate_token_count(text)
    }

    async fn generate(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        system_prompt: Option<String>,
    ) -> Result<ModelResponse, ProviderError> {
        (**self).generate(messages, tools, system_prompt).await
    }

    async fn generate_stream(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        system_prompt: Option<String>,
    ) -> Result<BoxStream<'static, Result<StreamEvent, ProviderError>>, ProviderError> {
        (**self)
            .generate_stream(messages, tools, system_prompt)
            .await
    }
}
