//! Top-level error types for maestro
//!
//! This module provides a simplified, user-facing error type that flattens
//! the internal error hierarchy into actionable categories. The
//! orchestrator's outermost frame converts these into response envelopes;
//! nothing below it translates.

use thiserror::Error;

use crate::agent::AgentError;
use crate::erp::ErpError;
use crate::memory::MemoryError;
use crate::model::{ProviderError, RegistryError};
use crate::security::{RateLimitExceeded, ValidationError};
use crate::tool::ToolError;
use crate::workflow::WorkflowError;

/// Top-level error type for maestro operations
///
/// Categories follow how callers need to react:
///
/// - [`Error::RateLimited`] / [`Error::Validation`] - admission failures,
///   returned to the caller as-is
/// - [`Error::Auth`] - fix credentials and retry
/// - [`Error::Network`] / [`Error::Unavailable`] - transient, retry
/// - [`Error::CircuitOpen`] - the dependency is failing, wait
/// - [`Error::Model`] / [`Error::Tool`] / [`Error::Workflow`] - the
///   request itself went wrong
/// - [`Error::Config`] / [`Error::Memory`] - operator attention needed
#[derive(Debug, Error)]
pub enum Error {
    /// A rate limit rejected the request
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Input validation rejected the request
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Authentication failed (invalid or expired credentials)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network connectivity issue
    #[error("network error: {0}")]
    Network(String),

    /// Service temporarily unavailable
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// A circuit breaker is open
    #[error("{0}")]
    CircuitOpen(String),

    /// Model error (content filtered, context too long, empty response)
    #[error("model error: {0}")]
    Model(String),

    /// Tool execution failed
    #[error("tool error: {0}")]
    Tool(String),

    /// Workflow construction or execution failed
    #[error("workflow error: {0}")]
    Workflow(String),

    /// Conversation memory failure
    #[error("memory error: {0}")]
    Memory(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Taxonomy tag recorded with failure metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "RateLimited",
            Self::Validation(_) => "Validation",
            Self::Auth(_) => "Auth",
            Self::Network(_) => "Network",
            Self::Unavailable(_) => "Unavailable",
            Self::CircuitOpen(_) => "CircuitOpen",
            Self::Model(_) => "Model",
            Self::Tool(_) => "Tool",
            Self::Workflow(_) => "Workflow",
            Self::Memory(_) => "Memory",
            Self::Config(_) => "Config",
            Self::Other(_) => "Other",
        }
    }

    /// Returns true if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Network(_) | Self::Unavailable(_) | Self::CircuitOpen(_)
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<RateLimitExceeded> for Error {
    fn from(err: RateLimitExceeded) -> Self {
        Self::RateLimited(err.message)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.message)
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Authentication(msg) => Self::Auth(msg),
            ProviderError::RateLimited(msg) => Self::Unavailable(msg),
            ProviderError::Network(msg) | ProviderError::Timeout(msg) => Self::Network(msg),
            ProviderError::ServiceUnavailable(msg) => Self::Unavailable(msg),
            ProviderError::Model(msg) => Self::Model(msg),
            ProviderError::Configuration(msg) => Self::Config(msg),
            ProviderError::Other(msg) => Self::Other(msg),
        }
    }
}

impl From<ToolError> for Error {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Validation(inner) => Self::Validation(inner.message),
            ToolError::RateLimited(inner) => Self::RateLimited(inner.message),
            other => Self::Tool(other.to_string()),
        }
    }
}

impl From<AgentError> for Error {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Provider(e) => e.into(),
            AgentError::Tool(e) => e.into(),
            AgentError::NoResponse => Self::Model("model returned no response".to_string()),
            AgentError::EmptyResponse => Self::Model("model returned empty response".to_string()),
            AgentError::MaxTokensExceeded => {
                Self::Model("response exceeded maximum token limit".to_string())
            }
            AgentError::ContentFiltered => {
                Self::Model("response was filtered by content moderation".to_string())
            }
            AgentError::UnexpectedStopReason(reason) => {
                Self::Model(format!("unexpected stop reason: {}", reason))
            }
        }
    }
}

impl From<ErpError> for Error {
    fn from(err: ErpError) -> Self {
        match err {
            ErpError::Auth(msg) => Self::Auth(msg),
            ErpError::CircuitOpen { .. } => Self::CircuitOpen(err.to_string()),
            ErpError::Transient(msg) => Self::Network(msg),
            ErpError::RateLimited { .. } => Self::Unavailable(err.to_string()),
            ErpError::Config(msg) => Self::Config(msg),
            other => Self::Tool(other.to_string()),
        }
    }
}

impl From<MemoryError> for Error {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Config(msg) => Self::Config(msg),
            other => Self::Memory(other.to_string()),
        }
    }
}

impl From<WorkflowError> for Error {
    fn from(err: WorkflowError) -> Self {
        Self::Workflow(err.to_string())
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type for maestro operations
pub type Result<T> = std::result::Result<T, Error>;
