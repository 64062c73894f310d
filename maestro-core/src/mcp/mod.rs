//! Stateful external-tool (MCP) session support
//!
//! Some external tool servers keep per-conversation state (open forms,
//! partial transactions) across tool invocations. The session manager in
//! this module maintains that context per `(chat_id, server)` pair, across
//! process restarts, using the same cache and persistence capabilities as
//! the chat history manager.

pub mod session;

pub use session::{McpSessionConfig, McpSessionManager, McpSessionState};
