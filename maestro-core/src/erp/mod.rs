//! ERP external-tool adapter
//!
//! Wraps a stateful, OAuth-protected ERP tool server with the production
//! hardening the request path needs: a caching token provider with
//! single-flight refresh, a circuit breaker, retry with 401 refresh and
//! 429 backoff, and MCP session-context injection.

pub mod breaker;
pub mod token;
pub mod tool;

pub use breaker::{BreakerState, CircuitBreaker};
pub use token::{AccessToken, ErpTokenProvider, TokenCredential};
pub use tool::{
    register_erp_tools, ChannelConnector, ErpChannel, ErpRemoteTool, ErpTool, ErpToolConfig,
    HttpErpChannel,
};

/// Errors from the ERP adapter, classified for retry handling
#[derive(Debug, thiserror::Error)]
pub enum ErpError {
    /// Authentication rejected (HTTP 401 equivalent). Triggers one token
    /// refresh and retry per attempt budget.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Rate limited by the remote (HTTP 429 equivalent)
    #[error("rate limited by remote, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Transient network or timeout failure, retried with backoff
    #[error("transient error: {0}")]
    Transient(String),

    /// Terminal HTTP error (4xx other than 401/429)
    #[error("remote returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// The circuit breaker is open
    #[error("circuit breaker '{name}' is open, retry in {retry_in:.1}s")]
    CircuitOpen { name: String, retry_in: f64 },

    /// The adapter is not connected
    #[error("not connected to ERP tool server; call connect() first")]
    NotConnected,

    /// Configuration problem
    #[error("ERP configuration error: {0}")]
    Config(String),

    /// Malformed payload from the remote
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ErpError {
    /// Taxonomy tag for metrics and response envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            ErpError::Auth(_) => "Auth",
            ErpError::RateLimited { .. } => "RateLimited",
            ErpError::Transient(_) => "Transient",
            ErpError::Status { .. } => "Status",
            ErpError::CircuitOpen { .. } => "CircuitOpen",
            ErpError::NotConnected => "NotConnected",
            ErpError::Config(_) => "Config",
            ErpError::Protocol(_) => "Protocol",
        }
    }
}
