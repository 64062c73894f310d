//! The agentic loop - non-streaming execution

use std::time::Instant;

use crate::model::retry_with_backoff;
use crate::thread::ChatThread;
use crate::tool::ToolContext;
use crate::types::{Message, StopReason, TokenUsage, ToolResultBlock};

use super::{Agent, AgentError};

/// Result of a completed agent run
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    /// Final text response
    pub text: String,
    /// Names of the tools invoked, in call order
    pub tool_calls: Vec<String>,
    /// Aggregate token usage across model calls
    pub usage: TokenUsage,
    /// Number of model calls made
    pub model_calls: usize,
    /// Wall-clock duration of the run
    pub duration: std::time::Duration,
}

impl Agent {
    /// Run the agent with a user message against a thread
    ///
    /// Executes the agentic loop: call the model, execute any requested
    /// tools through the middleware chain, append the results, and repeat
    /// until the model returns a final text response. The thread is
    /// mutated in place; the caller holds it exclusively for the duration
    /// of the run.
    ///
    /// Model calls are retried for transient errors only (network,
    /// timeout); everything else surfaces immediately.
    pub async fn run(
        &self,
        user_message: &str,
        thread: &mut ChatThread,
        ctx: &ToolContext,
    ) -> Result<AgentRunResult, AgentError> {
        let run_start = Instant::now();
        let mut tool_calls: Vec<String> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut model_calls = 0usize;

        thread.push(Message::user(user_message));

        loop {
            let tool_defs = self.dispatcher.registry().definitions();
            let messages = thread.messages().to_vec();

            let response = retry_with_backoff(
                || {
                    self.model.generate(
                        messages.clone(),
                        tool_defs.clone(),
                        self.system_prompt.clone(),
                    )
                },
                &self.retry,
            )
            .await?;

            model_calls += 1;
            if let Some(u) = response.usage {
                usage.input_tokens += u.input_tokens;
                usage.output_tokens += u.output_tokens;
            }

            thread.push(response.message.clone());

            match response.stop_reason {
                StopReason::ToolUse => {
                    let mut results = Vec::new();
                    for tool_use in response.message.tool_uses() {
                        tool_calls.push(tool_use.name.clone());
                        let result = self
                            .dispatcher
                            .dispatch(&tool_use.name, tool_use.input.clone(), ctx.clone())
                            .await;
                        results.push(match result {
                            Ok(output) => ToolResultBlock::success(&tool_use.id, output),
                            Err(err) => {
                                tracing::warn!(
                                    tool = %tool_use.name,
                                    error = %err,
                                    "tool call failed, reporting to model"
                                );
                                ToolResultBlock::error(&tool_use.id, err.to_string())
                            }
                        });
                    }
                    if results.is_empty() {
                        return Err(AgentError::EmptyResponse);
                    }
                    thread.push(Message::tool_results(results));
                }
                StopReason::EndTurn | StopReason::StopSequence => {
                    let text = response.message.text();
                    if text.is_empty() {
                        return Err(AgentError::NoResponse);
                    }
                    return Ok(AgentRunResult {
                        text,
                        tool_calls,
                        usage,
                        model_calls,
                        duration: run_start.elapsed(),
                    });
                }
                StopReason::MaxTokens => return Err(AgentError::MaxTokensExceeded),
                StopReason::ContentFiltered => return Err(AgentError::ContentFiltered),
                StopReason::Unknown => {
                    return Err(AgentError::UnexpectedStopReason("unknown".to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChatModel;
    use crate::test_utils::MockModel;
    use crate::tool::{Tool, ToolDispatcher, ToolError, ToolRegistry};
    use crate::types::Role;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Deserialize, JsonSchema)]
    struct WeatherInput {
        city: String,
    }

    struct WeatherTool;

    impl Tool for WeatherTool {
        type Input = WeatherInput;

        fn name(&self) -> &str {
            "weather_lookup"
        }

        fn description(&self) -> &str {
            "Look up the weather for a city"
        }

        fn execute(
            &self,
            input: Self::Input,
            _ctx: &ToolContext,
        ) -> impl std::future::Future<Output = Result<String, ToolError>> + Send {
            async move { Ok(format!("Sunny in {}", input.city)) }
        }
    }

    fn agent_with(model: MockModel) -> Agent {
        let mut registry = ToolRegistry::new();
        registry.register(WeatherTool);
        let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(registry), vec![]));
        Agent::new(
            Arc::new(model) as Arc<dyn ChatModel>,
            Some("You are helpful.".to_string()),
            dispatcher,
        )
    }

    #[tokio::test]
    async fn test_plain_text_run() {
        let agent = agent_with(MockModel::new().with_text("Hello!"));
        let mut thread = ChatThread::new();

        let result = agent
            .run("Hi", &mut thread, &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.text, "Hello!");
        assert_eq!(result.model_calls, 1);
        assert!(result.tool_calls.is_empty());

        // user + assistant
        assert_eq!(thread.len(), 2);
        assert_eq!(thread.messages()[0].role, Role::User);
        assert_eq!(thread.messages()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_tool_loop() {
        let agent = agent_with(
            MockModel::new()
                .with_tool_use("weather_lookup", json!({"city": "Oslo"}))
                .with_text("It is sunny in Oslo."),
        );
        let mut thread = ChatThread::new();

        let result = agent
            .run("Weather in Oslo?", &mut thread, &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.text, "It is sunny in Oslo.");
        assert_eq!(result.tool_calls, vec!["weather_lookup"]);
        assert_eq!(result.model_calls, 2);

        // user + assistant(tool_use) + tool results + assistant
        assert_eq!(thread.len(), 4);
        assert_eq!(thread.messages()[2].role, Role::Tool);
        assert!(thread.messages()[2].text_len() > 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let agent = agent_with(
            MockModel::new()
                .with_tool_use("nonexistent", json!({}))
                .with_text("I could not use that tool."),
        );
        let mut thread = ChatThread::new();

        let result = agent
            .run("Do something", &mut thread, &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.text, "I could not use that tool.");

        // The error went back to the model as an error tool result.
        let tool_msg = &thread.messages()[2];
        assert!(tool_msg.content.iter().any(|c| matches!(
            c,
            crate::types::ContentBlock::ToolResult(r)
                if r.status == crate::types::ToolResultStatus::Error
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_model_errors_retried() {
        let model = MockModel::new().with_transient_failures(2).with_text("ok");
        let call_counter = model.clone();
        let agent = agent_with(model);
        let mut thread = ChatThread::new();

        let result = agent
            .run("Hi", &mut thread, &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result.text, "ok");
        assert_eq!(call_counter.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_model_error_surfaces() {
        let agent = agent_with(MockModel::new().failing("context too long"));
        let mut thread = ChatThread::new();

        let err = agent
            .run("Hi", &mut thread, &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
    }
}
