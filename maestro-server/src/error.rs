//! Error types for the maestro server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use maestro_core::ErrorResponse;

/// Errors that can occur in the maestro server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid request from the client.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "InvalidRequest",
            ServerError::NotFound(_) => "NotFound",
            ServerError::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse::new(self.to_string(), self.error_type());
        (status, Json(body)).into_response()
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
