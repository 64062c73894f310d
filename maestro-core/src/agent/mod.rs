//! The agent loop
//!
//! An [`Agent`] drives the conversation with the model: it presents the
//! registered tools, executes requested tool calls through the middleware
//! chain, feeds results back, and repeats until the model ends its turn.
//! It also owns thread creation and (de)serialization, which makes it the
//! chat-client capability the rest of the runtime consumes.

mod run;
mod streaming;

pub use run::AgentRunResult;
pub use streaming::AgentStreamEvent;

use std::sync::Arc;

use crate::model::{ChatModel, ProviderError, RetryConfig};
use crate::thread::{ChatThread, ThreadError};
use crate::tool::{ToolDispatcher, ToolError};

/// Errors from the agent loop
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("model returned no response")]
    NoResponse,

    #[error("model returned empty response")]
    EmptyResponse,

    #[error("response exceeded maximum token limit")]
    MaxTokensExceeded,

    #[error("response was filtered by content moderation")]
    ContentFiltered,

    #[error("unexpected stop reason: {0}")]
    UnexpectedStopReason(String),
}

/// Agent orchestrating model calls and tool execution over a thread
pub struct Agent {
    pub(super) model: Arc<dyn ChatModel>,
    pub(super) system_prompt: Option<String>,
    pub(super) dispatcher: Arc<ToolDispatcher>,
    pub(super) retry: RetryConfig,
}

impl Agent {
    /// Create an agent over a model and a tool dispatcher
    pub fn new(
        model: Arc<dyn ChatModel>,
        system_prompt: Option<String>,
        dispatcher: Arc<ToolDispatcher>,
    ) -> Self {
        Self {
            model,
            system_prompt,
            dispatcher,
            retry: RetryConfig::default(),
        }
    }

    /// Override the transient-error retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Model backing this agent
    pub fn model(&self) -> &Arc<dyn ChatModel> {
        &self.model
    }

    /// Create an empty thread
    pub fn new_thread(&self) -> ChatThread {
        ChatThread::new()
    }

    /// Serialize a thread to its storage form
    pub fn serialize_thread(&self, thread: &ChatThread) -> Result<serde_json::Value, ThreadError> {
        thread.to_data()
    }

    /// Deserialize a validated payload back into a thread
    pub fn deserialize_thread(&self, data: &serde_json::Value) -> Result<ChatThread, ThreadError> {
        ChatThread::from_data(data)
    }
}
