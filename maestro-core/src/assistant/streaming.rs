//! Request processing - the streaming paths

use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::agent::AgentStreamEvent;
use crate::error::Error;
use crate::responses::{StreamChunk, WorkflowStreamChunk};
use crate::security::InputContext;
use crate::tool::ToolContext;

use super::run::{elapsed_ms, SlotGuard};
use super::Assistant;

impl Assistant {
    /// Process a question, streaming incremental chunks
    ///
    /// Mirrors [`Assistant::process_question`]; the final chunk carries
    /// the chat ID and the set of tools invoked. Exactly one `done=true`
    /// chunk ends every sequence, and dropping the stream releases the
    /// concurrency slot and stops production at the next yield point.
    pub fn process_question_stream(
        self: &Arc<Self>,
        question: String,
        chat_id: Option<String>,
        user_id: Option<String>,
    ) -> BoxStream<'static, StreamChunk> {
        let assistant = Arc::clone(self);
        Box::pin(async_stream::stream! {
            let start = Instant::now();

            if let Err(rejection) = assistant
                .limiter
                .check_limit(user_id.as_deref(), (question.len() / 4) as u64)
            {
                assistant.metrics.record_request(elapsed_ms(start), false);
                assistant.metrics.record_error("RateLimited", "process_question_stream");
                yield StreamChunk::error(rejection.to_string());
                return;
            }
            let _slot = SlotGuard::acquire(&assistant.limiter, user_id.as_deref());

            let validated = match assistant
                .validator
                .validate(&question, InputContext::Question)
            {
                Ok(validated) => validated,
                Err(err) => {
                    let err: Error = err.into();
                    assistant.metrics.record_request(elapsed_ms(start), false);
                    assistant.metrics.record_error(err.error_type(), "process_question_stream");
                    yield StreamChunk::error(format!("Error: {}", err));
                    return;
                }
            };

            let (chat_id, thread) = match assistant
                .history
                .get_or_create_thread(chat_id.as_deref())
                .await
            {
                Ok(resolved) => resolved,
                Err(err) => {
                    let err: Error = err.into();
                    assistant.metrics.record_request(elapsed_ms(start), false);
                    assistant.metrics.record_error(err.error_type(), "process_question_stream");
                    yield StreamChunk::error(format!("Error: {}", err));
                    return;
                }
            };

            tracing::info!(chat_id = %chat_id, "starting streaming response");

            let ctx = ToolContext {
                chat_id: Some(chat_id.clone()),
                user_id: user_id.clone(),
            };

            let mut events = assistant
                .agent
                .clone()
                .run_stream(validated, thread.clone(), ctx);

            let mut tool_calls: Vec<String> = Vec::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(AgentStreamEvent::TextDelta(delta)) => {
                        yield StreamChunk::text(delta);
                    }
                    Ok(AgentStreamEvent::ToolCalled(name)) => {
                        tool_calls.push(name);
                    }
                    Ok(AgentStreamEvent::Completed { usage, .. }) => {
                        drop(events);

                        {
                            let thread = thread.lock().await;
                            assistant.history.save_thread(&chat_id, &thread, false).await;
                        }
                        assistant
                            .history
                            .summarize_if_needed(&chat_id, assistant.agent.model())
                            .await;

                        let latency = elapsed_ms(start);
                        assistant.metrics.record_request(latency, true);
                        assistant
                            .metrics
                            .record_tokens(usage.input_tokens as u64, usage.output_tokens as u64);
                        assistant
                            .limiter
                            .record_request(user_id.as_deref(), usage.total() as u64);

                        yield StreamChunk::done(
                            chat_id.clone(),
                            (!tool_calls.is_empty()).then(|| tool_calls.clone()),
                        );
                        return;
                    }
                    Err(err) => {
                        drop(events);
                        let err: Error = err.into();
                        assistant.metrics.record_request(elapsed_ms(start), false);
                        assistant
                            .metrics
                            .record_error(err.error_type(), "process_question_stream");
                        tracing::error!(chat_id = %chat_id, error = %err, "streaming failed");
                        yield StreamChunk::error(format!("Error: {}", err));
                        return;
                    }
                }
            }

            // The agent stream ended without a completion event.
            yield StreamChunk::error("stream ended unexpectedly");
        })
    }

    /// Run a named workflow, streaming per-agent chunks
    pub fn run_workflow_stream(
        self: &Arc<Self>,
        workflow_name: String,
        message: String,
    ) -> BoxStream<'static, WorkflowStreamChunk> {
        if !self.workflows.contains(&workflow_name) {
            let available = self.workflows.workflow_names().join(", ");
            return Box::pin(futures::stream::once(async move {
                WorkflowStreamChunk::error(format!(
                    "Workflow '{}' not found. Available: {}",
                    workflow_name, available
                ))
            }));
        }
        self.workflows.run_stream(workflow_name, message)
    }
}
