//! Application state for the maestro server.

use std::sync::Arc;

use maestro_core::Assistant;

/// Shared application state containing the assistant.
///
/// Cloned for each request handler.
#[derive(Clone)]
pub struct AppState {
    /// The shared assistant instance.
    pub assistant: Arc<Assistant>,
}

impl AppState {
    /// Create new application state from an `Arc<Assistant>`.
    pub fn from_arc(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }
}
