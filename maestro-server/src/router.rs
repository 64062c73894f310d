//! Router builder for maestro HTTP endpoints.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;

use maestro_core::Assistant;

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Builder for the maestro HTTP router.
///
/// # Endpoints
///
/// - `POST /ask` - process a question, JSON response
/// - `POST /ask/stream` - process a question, SSE stream of chunks
/// - `POST /workflows/{name}` - run a workflow
/// - `POST /workflows/{name}/stream` - run a workflow, SSE stream
/// - `GET /workflows` / `GET /models` - listings
/// - `GET /chats` / `DELETE /chats/{id}` - chat management
/// - `GET /health`, `GET /health/ready`, `GET /health/live` - probes
pub struct MaestroRouter {
    assistant: Arc<Assistant>,
    cors: bool,
}

impl MaestroRouter {
    /// Create a new router builder with the given assistant.
    pub fn new(assistant: Assistant) -> Self {
        Self::from_arc(Arc::new(assistant))
    }

    /// Create a new router builder from an existing `Arc<Assistant>`.
    pub fn from_arc(assistant: Arc<Assistant>) -> Self {
        Self {
            assistant,
            cors: false,
        }
    }

    /// Enable a permissive CORS layer.
    pub fn with_cors(mut self) -> Self {
        self.cors = true;
        self
    }

    /// Build the router with all endpoints.
    pub fn build(self) -> Router {
        let state = AppState::from_arc(self.assistant);

        let mut router = Router::new()
            .route("/ask", post(ask))
            .route("/ask/stream", post(ask_stream))
            .route("/workflows", get(list_workflows))
            .route("/workflows/:name", post(run_workflow))
            .route("/workflows/:name/stream", post(run_workflow_stream))
            .route("/models", get(list_models))
            .route("/chats", get(list_chats))
            .route("/chats/:id", delete(delete_chat))
            .route("/usage", get(usage))
            .route("/health", get(health))
            .route("/health/ready", get(readiness))
            .route("/health/live", get(liveness))
            .with_state(state);

        if self.cors {
            router = router.layer(tower_http::cors::CorsLayer::permissive());
        }
        router
    }
}

/// Request body for question processing.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Request body for workflow execution.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ListChatsQuery {
    #[serde(default = "default_source")]
    source: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_source() -> String {
    "all".to_string()
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    #[serde(default)]
    user_id: Option<String>,
}

async fn ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ServerResult<impl IntoResponse> {
    if request.question.trim().is_empty() {
        return Err(ServerError::InvalidRequest("question must not be empty".into()));
    }

    let response = state
        .assistant
        .process_question(
            &request.question,
            request.chat_id.as_deref(),
            request.user_id.as_deref(),
            request.model.as_deref(),
        )
        .await;
    Ok(Json(response))
}

async fn ask_stream(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> ServerResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if request.question.trim().is_empty() {
        return Err(ServerError::InvalidRequest("question must not be empty".into()));
    }

    let chunks = state.assistant.process_question_stream(
        request.question,
        request.chat_id,
        request.user_id,
    );

    let events = chunks.map(|chunk| {
        Ok(Event::default()
            .json_data(&chunk)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn run_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<WorkflowRequest>,
) -> impl IntoResponse {
    Json(state.assistant.run_workflow(&name, &request.message).await)
}

async fn run_workflow_stream(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<WorkflowRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let chunks = state.assistant.run_workflow_stream(name, request.message);
    let events = chunks.map(|chunk| {
        Ok(Event::default()
            .json_data(&chunk)
            .unwrap_or_else(|_| Event::default().data("{}")))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn list_workflows(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.assistant.list_workflows())
}

async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.assistant.list_models())
}

async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ListChatsQuery>,
) -> ServerResult<impl IntoResponse> {
    if !matches!(query.source.as_str(), "cache" | "persistence" | "all") {
        return Err(ServerError::InvalidRequest(format!(
            "unknown source '{}'",
            query.source
        )));
    }
    Ok(Json(
        state.assistant.list_chats(&query.source, query.limit).await,
    ))
}

async fn delete_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let deleted = state.assistant.delete_chat(&id).await;
    Json(serde_json::json!({ "chat_id": id, "deleted": deleted }))
}

async fn usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> impl IntoResponse {
    Json(state.assistant.usage(query.user_id.as_deref()))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = state.assistant.health_check().await;
    let status = match response.status {
        maestro_core::HealthStatus::Unhealthy => axum::http::StatusCode::SERVICE_UNAVAILABLE,
        _ => axum::http::StatusCode::OK,
    };
    (status, Json(response))
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.assistant.readiness().await {
        (axum::http::StatusCode::OK, "ready")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    if state.assistant.liveness() {
        (axum::http::StatusCode::OK, "alive")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "dead")
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
