//! HTTP surface for the maestro orchestration runtime.
//!
//! Exposes the assistant's entry points over axum: single-shot and
//! streaming (SSE) question processing, workflow execution, chat listing
//! and deletion, and health/readiness/liveness probes.
//!
//! # Example
//!
//! ```rust,no_run
//! use maestro_server::MaestroRouter;
//! use maestro_core::Assistant;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let assistant: Assistant = todo!();
//! let app = MaestroRouter::new(assistant).with_cors().build();
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod router;
pub(crate) mod state;

pub use error::{ServerError, ServerResult};
pub use router::{AskRequest, MaestroRouter, WorkflowRequest};
