//! # Maestro
//!
//! An orchestration runtime for conversational AI assistants: a
//! concurrency-safe request path with rate limiting and input validation,
//! a two-tier conversation store with background persistence and context
//! summarization, a tool registry with a middleware chain, a hardened
//! adapter for stateful OAuth-protected tool servers, a multi-agent
//! workflow engine with conditional routing, and health/metrics plumbing.
//!
//! ## Quick Start
//!
//! ```ignore
//! use maestro_core::{Assistant, AssistantConfig};
//!
//! #[tokio::main]
//! async fn main() -> maestro_core::Result<()> {
//!     let config = AssistantConfig::load("config/assistant.toml").await
//!         .map_err(maestro_core::Error::Config)?;
//!
//!     let assistant = Assistant::builder()
//!         .config(config)
//!         .system_prompt("You are a helpful assistant.")
//!         .model_factory(my_model_constructors())
//!         .build()
//!         .await?;
//!
//!     let response = assistant
//!         .process_question("What is the order status?", None, Some("alice"), None)
//!         .await;
//!     println!("{}", response.response);
//!
//!     assistant.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`assistant`] - the request orchestrator and builder
//! - [`agent`] - the agent loop over a [`model::ChatModel`] backend
//! - [`memory`] - chat history across cache + persistence, with
//!   summarization
//! - [`tool`] - tool registry, descriptors, and the middleware chain
//! - [`mcp`] - stateful external-tool session management
//! - [`erp`] - the OAuth + circuit-breaker tool-server adapter
//! - [`workflow`] - multi-agent workflows with conditional edges
//! - [`security`] - rate limiting and input validation
//! - [`health`] / [`metrics`] - operational surfaces
//!
//! External collaborators (the LM backend, the hot cache, the cold object
//! store, the OAuth credential) are consumed as traits; mocks for all of
//! them live in [`test_utils`] behind the `test-utils` feature.

pub mod agent;
pub mod assistant;
pub mod config;
pub mod erp;
pub mod error;
pub mod health;
pub mod mcp;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod responses;
pub mod security;
pub mod thread;
pub mod tool;
pub mod types;
pub mod workflow;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use agent::{Agent, AgentError, AgentRunResult, AgentStreamEvent};
pub use assistant::{Assistant, AssistantBuilder};
pub use config::{AssistantConfig, ObservabilityConfig, SecuritySection, ToolsConfig};
pub use erp::{CircuitBreaker, ErpError, ErpTool, ErpToolConfig, TokenCredential};
pub use error::{Error, Result};
pub use health::{HealthCheckConfig, HealthChecker};
pub use mcp::{McpSessionConfig, McpSessionManager, McpSessionState};
pub use memory::{
    CacheConfig, ChatHistoryManager, ColdStore, HotCache, InMemoryCache, MemoryConfig,
    PersistenceConfig, SummarizationConfig,
};
pub use metrics::{MetricsCollector, MetricsConfig, MetricsSnapshot};
pub use model::{
    ChatModel, ModelFactory, ModelProviderConfig, ModelRegistry, ModelResponse, ProviderError,
    RetryConfig, StreamEvent,
};
pub use responses::{
    ChatListItem, ComponentHealth, ErrorResponse, HealthResponse, HealthStatus, QuestionResponse,
    StreamChunk, WorkflowResponse, WorkflowStreamChunk,
};
pub use security::{
    InputValidator, RateLimitConfig, RateLimiter, ValidationConfig, ValidationError,
};
pub use thread::ChatThread;
pub use tool::{box_tool, DynTool, Tool, ToolContext, ToolError, ToolRegistry, ToolService};
pub use types::{ContentBlock, Message, Role, StopReason, TokenUsage, ToolDefinition};
pub use workflow::{ConditionEvaluator, WorkflowConfig, WorkflowKind, WorkflowManager};
