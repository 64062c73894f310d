//! Response envelopes for all entry points
//!
//! Every failure the orchestrator recovers becomes one of these envelopes
//! with `success=false` and a diagnostic message; stack traces and secrets
//! never appear here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::WorkflowStep;

/// Response for a processed question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionResponse {
    /// Original question
    pub question: String,
    /// The assistant's response, or a diagnostic message on failure
    pub response: String,
    /// Whether processing succeeded
    pub success: bool,
    /// Session ID for conversation continuity
    pub chat_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<usize>,
    /// Tools that were called during the run
    #[serde(default)]
    pub tool_calls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Model used for the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl QuestionResponse {
    /// Build a failure envelope
    pub fn failure(
        question: impl Into<String>,
        message: impl Into<String>,
        chat_id: impl Into<String>,
        latency_ms: Option<f64>,
    ) -> Self {
        Self {
            question: question.into(),
            response: message.into(),
            success: false,
            chat_id: chat_id.into(),
            tokens_used: None,
            prompt_tokens: None,
            completion_tokens: None,
            tool_calls: Vec::new(),
            latency_ms,
            model: None,
        }
    }
}

/// Streaming response chunk
///
/// Sequences end with exactly one `done=true` chunk; the final chunk
/// carries the chat ID and the set of tools invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    /// An incremental text chunk
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
            chat_id: None,
            tokens_used: None,
            tool_calls: None,
            error: None,
        }
    }

    /// The terminal chunk of a successful stream
    pub fn done(chat_id: impl Into<String>, tool_calls: Option<Vec<String>>) -> Self {
        Self {
            text: String::new(),
            done: true,
            chat_id: Some(chat_id.into()),
            tokens_used: None,
            tool_calls,
            error: None,
        }
    }

    /// A terminal error chunk
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            done: true,
            chat_id: None,
            tokens_used: None,
            tool_calls: None,
            error: Some(message.into()),
        }
    }
}

/// Response for a workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub workflow: String,
    pub message: String,
    pub response: String,
    pub success: bool,
    /// Name of the final responding agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStepInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

/// One step of an executed workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStepInfo {
    pub agent: String,
    pub status: String,
}

impl From<WorkflowStep> for WorkflowStepInfo {
    fn from(step: WorkflowStep) -> Self {
        Self {
            agent: step.agent,
            status: step.status,
        }
    }
}

impl WorkflowResponse {
    /// Build a failure envelope
    pub fn failure(
        workflow: impl Into<String>,
        message: impl Into<String>,
        response: impl Into<String>,
        latency_ms: Option<f64>,
    ) -> Self {
        Self {
            workflow: workflow.into(),
            message: message.into(),
            response: response.into(),
            success: false,
            author: None,
            steps: Vec::new(),
            latency_ms,
        }
    }
}

/// Streaming workflow chunk, attributed to the agent that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStreamChunk {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowStreamChunk {
    pub fn text(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
            author: Some(author.into()),
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            text: String::new(),
            done: true,
            author: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            done: true,
            author: None,
            error: Some(message.into()),
        }
    }
}

/// Health status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of a single component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Health check response
///
/// Overall status is `unhealthy` if any component is unhealthy, else
/// `degraded` if any is degraded, else `healthy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: f64,
    #[serde(default)]
    pub components: Vec<ComponentHealth>,
}

/// One entry of a chat listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatListItem {
    pub chat_id: String,
    /// Whether the chat currently has an in-memory session
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<String>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub persisted: bool,
    /// Which tier this entry was found in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_remaining: Option<u64>,
}

/// Error envelope for transport surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_type: error_type.into(),
            details: None,
            request_id: None,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_failure_envelope() {
        let resp = QuestionResponse::failure("q", "Rate limit exceeded: slow down", "c1", Some(3.5));
        assert!(!resp.success);
        assert_eq!(resp.chat_id, "c1");
        assert!(resp.response.starts_with("Rate limit exceeded"));
    }

    #[test]
    fn test_stream_chunk_constructors() {
        let chunk = StreamChunk::text("hello");
        assert!(!chunk.done);

        let done = StreamChunk::done("c1", Some(vec!["weather".to_string()]));
        assert!(done.done);
        assert_eq!(done.chat_id.as_deref(), Some("c1"));

        let err = StreamChunk::error("boom");
        assert!(err.done);
        assert_eq!(err.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_optional_fields_omitted_in_json() {
        let chunk = StreamChunk::text("x");
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains("chat_id"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_health_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn test_error_response_has_timestamp() {
        let err = ErrorResponse::new("bad input", "ValidationError");
        assert_eq!(err.error_type, "ValidationError");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("timestamp").is_some());
    }
}
