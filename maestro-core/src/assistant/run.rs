//! Request processing - the single-shot paths

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use crate::agent::{Agent, AgentRunResult};
use crate::error::Error;
use crate::responses::{QuestionResponse, WorkflowResponse};
use crate::security::{InputContext, RateLimiter};
use crate::tool::ToolContext;

use super::Assistant;

/// Releases the concurrency slot on every exit path, including
/// cancellation
pub(super) struct SlotGuard {
    limiter: Arc<RateLimiter>,
    user_id: Option<String>,
}

impl SlotGuard {
    pub(super) fn acquire(limiter: &Arc<RateLimiter>, user_id: Option<&str>) -> Self {
        limiter.acquire_concurrent_slot(user_id);
        Self {
            limiter: limiter.clone(),
            user_id: user_id.map(str::to_string),
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.limiter.release_concurrent_slot(self.user_id.as_deref());
    }
}

pub(super) fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

impl Assistant {
    /// Process a question end to end
    ///
    /// Admission (rate limit + concurrency slot), validation, thread
    /// resolution, agent run with transient-error retry, thread save,
    /// summarization check, metrics. Every failure is recovered into a
    /// `success=false` envelope here; nothing below this frame translates
    /// errors.
    pub async fn process_question(
        &self,
        question: &str,
        chat_id: Option<&str>,
        user_id: Option<&str>,
        model: Option<&str>,
    ) -> QuestionResponse {
        let start = Instant::now();
        let span = tracing::info_span!(
            "process_question",
            chat_id = chat_id.unwrap_or("new"),
            model = model.unwrap_or("default"),
        );

        async move {
            if let Err(rejection) = self
                .limiter
                .check_limit(user_id, (question.len() / 4) as u64)
            {
                let latency = elapsed_ms(start);
                self.metrics.record_request(latency, false);
                self.metrics.record_error("RateLimited", "process_question");
                return QuestionResponse::failure(
                    question,
                    rejection.to_string(),
                    chat_id.unwrap_or(""),
                    Some(latency),
                );
            }
            let _slot = SlotGuard::acquire(&self.limiter, user_id);

            tracing::info!(
                question_length = question.len(),
                chat_id = chat_id.unwrap_or("new"),
                "processing question"
            );

            let mut resolved_chat = chat_id.map(str::to_string);
            let outcome = self.answer(question, &mut resolved_chat, user_id, model).await;
            let latency = elapsed_ms(start);

            match outcome {
                Ok((validated_question, result, model_name)) => {
                    self.metrics.record_request(latency, true);
                    self.metrics.record_tokens(
                        result.usage.input_tokens as u64,
                        result.usage.output_tokens as u64,
                    );
                    self.limiter
                        .record_request(user_id, result.usage.total() as u64);

                    let chat_id = resolved_chat.unwrap_or_default();
                    tracing::info!(chat_id = %chat_id, latency_ms = latency, "processing completed");

                    QuestionResponse {
                        question: validated_question,
                        response: result.text,
                        success: true,
                        chat_id,
                        tokens_used: Some(result.usage.total()).filter(|t| *t > 0),
                        prompt_tokens: Some(result.usage.input_tokens).filter(|t| *t > 0),
                        completion_tokens: Some(result.usage.output_tokens).filter(|t| *t > 0),
                        tool_calls: result.tool_calls,
                        latency_ms: Some(latency),
                        model: Some(model_name),
                    }
                }
                Err(err) => {
                    self.metrics.record_request(latency, false);
                    self.metrics
                        .record_error(err.error_type(), "process_question");
                    tracing::error!(error = %err, "processing failed");

                    QuestionResponse::failure(
                        question,
                        format!("Error: {}", err),
                        resolved_chat.unwrap_or_default(),
                        Some(latency),
                    )
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Steps 4-9 of the request path; failures bubble to the translation
    /// boundary in `process_question`
    async fn answer(
        &self,
        question: &str,
        resolved_chat: &mut Option<String>,
        user_id: Option<&str>,
        model: Option<&str>,
    ) -> Result<(String, AgentRunResult, String), Error> {
        let validated = self
            .validator
            .validate(question, InputContext::Question)?;

        let (chat_id, thread) = self
            .history
            .get_or_create_thread(resolved_chat.as_deref())
            .await?;
        *resolved_chat = Some(chat_id.clone());

        let ctx = ToolContext {
            chat_id: Some(chat_id.clone()),
            user_id: user_id.map(str::to_string),
        };

        let agent = self.agent_for(model)?;
        let model_name = agent.model().name().to_string();

        let result = {
            // Holding the thread lock for the whole run serializes
            // concurrent requests against the same chat.
            let mut thread = thread.lock().await;
            let result = agent.run(&validated, &mut thread, &ctx).await?;
            self.history.save_thread(&chat_id, &thread, false).await;
            result
        };

        self.history
            .summarize_if_needed(&chat_id, agent.model())
            .await;

        Ok((validated, result, model_name))
    }

    /// Resolve the agent for a request: the shared default, or a
    /// transient agent over a per-request model override
    pub(super) fn agent_for(&self, model: Option<&str>) -> Result<Arc<Agent>, Error> {
        match model {
            Some(name) if Some(name) != self.registry.default_name() => {
                let provider = self.registry.get_provider(name)?;
                let client = self.factory.create_client(provider)?;
                tracing::debug!(model = name, "using model override");
                Ok(Arc::new(Agent::new(
                    client,
                    self.system_prompt.clone(),
                    self.dispatcher.clone(),
                )))
            }
            _ => Ok(self.agent.clone()),
        }
    }

    /// Run a named workflow to completion
    pub async fn run_workflow(&self, workflow_name: &str, message: &str) -> WorkflowResponse {
        let start = Instant::now();
        let span = tracing::info_span!("run_workflow", workflow = workflow_name);

        async move {
            if self.workflows.workflow_names().is_empty() {
                return WorkflowResponse::failure(
                    workflow_name,
                    message,
                    "No workflows configured",
                    Some(elapsed_ms(start)),
                );
            }
            if !self.workflows.contains(workflow_name) {
                let available = self.workflows.workflow_names().join(", ");
                return WorkflowResponse::failure(
                    workflow_name,
                    message,
                    format!(
                        "Workflow '{}' not found. Available: {}",
                        workflow_name, available
                    ),
                    Some(elapsed_ms(start)),
                );
            }

            tracing::info!(workflow = workflow_name, "running workflow");

            match self.workflows.run(workflow_name, message).await {
                Ok(run) => {
                    let latency = elapsed_ms(start);
                    tracing::info!(
                        workflow = workflow_name,
                        author = run.author.as_deref().unwrap_or(""),
                        latency_ms = latency,
                        "workflow completed"
                    );
                    WorkflowResponse {
                        workflow: workflow_name.to_string(),
                        message: message.to_string(),
                        response: run.response,
                        success: true,
                        author: run.author,
                        steps: run.steps.into_iter().map(Into::into).collect(),
                        latency_ms: Some(latency),
                    }
                }
                Err(err) => {
                    let latency = elapsed_ms(start);
                    let err: Error = err.into();
                    self.metrics.record_error(err.error_type(), "run_workflow");
                    tracing::error!(workflow = workflow_name, error = %err, "workflow failed");
                    WorkflowResponse::failure(
                        workflow_name,
                        message,
                        format!("Error: {}", err),
                        Some(latency),
                    )
                }
            }
        }
        .instrument(span)
        .await
    }
}
