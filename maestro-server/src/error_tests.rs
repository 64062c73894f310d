//! Tests for server error responses.

use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::error::ServerError;

#[test]
fn test_status_codes() {
    let resp = ServerError::InvalidRequest("bad".into()).into_response();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = ServerError::NotFound("missing".into()).into_response();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = ServerError::Internal("boom".into()).into_response();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn test_error_display() {
    let err = ServerError::InvalidRequest("question must not be empty".into());
    assert_eq!(err.to_string(), "Invalid request: question must not be empty");
}
