//! The agentic loop - streaming execution

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::model::{retry_with_backoff, StreamEvent};
use crate::thread::ChatThread;
use crate::tool::ToolContext;
use crate::types::{
    ContentBlock, Message, StopReason, TokenUsage, ToolResultBlock, ToolUseBlock,
};

use super::{Agent, AgentError};

/// Events yielded by a streaming agent run
#[derive(Debug, Clone)]
pub enum AgentStreamEvent {
    /// Incremental text from the model
    TextDelta(String),
    /// A tool was invoked
    ToolCalled(String),
    /// The run finished
    Completed {
        text: String,
        tool_calls: Vec<String>,
        usage: TokenUsage,
    },
}

impl Agent {
    /// Run the agent, yielding incremental events
    ///
    /// The thread mutex is held for the whole run, which serializes
    /// concurrent requests against the same chat. Consumers that drop the
    /// stream cancel production at the next yield point.
    pub fn run_stream(
        self: Arc<Self>,
        user_message: String,
        thread: Arc<Mutex<ChatThread>>,
        ctx: ToolContext,
    ) -> BoxStream<'static, Result<AgentStreamEvent, AgentError>> {
        Box::pin(async_stream::stream! {
            let mut thread = thread.lock().await;
            thread.push(Message::user(&user_message));

            let mut tool_calls: Vec<String> = Vec::new();
            let mut usage = TokenUsage::default();

            loop {
                let tool_defs = self.dispatcher.registry().definitions();
                let messages = thread.messages().to_vec();

                let stream_result = retry_with_backoff(
                    || {
                        self.model.generate_stream(
                            messages.clone(),
                            tool_defs.clone(),
                            self.system_prompt.clone(),
                        )
                    },
                    &self.retry,
                )
                .await;

                let mut stream = match stream_result {
                    Ok(stream) => stream,
                    Err(err) => {
                        yield Err(AgentError::Provider(err));
                        return;
                    }
                };

                let mut text = String::new();
                let mut tool_uses: Vec<ToolUseBlock> = Vec::new();
                let mut stop_reason = StopReason::EndTurn;

                while let Some(event) = stream.next().await {
                    match event {
                        Ok(StreamEvent::TextDelta(delta)) => {
                            text.push_str(&delta);
                            yield Ok(AgentStreamEvent::TextDelta(delta));
                        }
                        Ok(StreamEvent::ToolUse(tool_use)) => {
                            tool_uses.push(tool_use);
                        }
                        Ok(StreamEvent::Stop { stop_reason: reason, usage: u }) => {
                            stop_reason = reason;
                            if let Some(u) = u {
                                usage.input_tokens += u.input_tokens;
                                usage.output_tokens += u.output_tokens;
                            }
                        }
                        Err(err) => {
                            yield Err(AgentError::Provider(err));
                            return;
                        }
                    }
                }

                // Reassemble the assistant message from the stream.
                let mut content = Vec::new();
                if !text.is_empty() {
                    content.push(ContentBlock::Text(text.clone()));
                }
                for tool_use in &tool_uses {
                    content.push(ContentBlock::ToolUse(tool_use.clone()));
                }
                if content.is_empty() {
                    yield Err(AgentError::EmptyResponse);
                    return;
                }
                thread.push(Message::assistant_with_content(content));

                match stop_reason {
                    StopReason::ToolUse => {
                        let mut results = Vec::new();
                        for tool_use in &tool_uses {
                            tool_calls.push(tool_use.name.clone());
                            yield Ok(AgentStreamEvent::ToolCalled(tool_use.name.clone()));
                            let result = self
                                .dispatcher
                                .dispatch(&tool_use.name, tool_use.input.clone(), ctx.clone())
                                .await;
                            results.push(match result {
                                Ok(output) => ToolResultBlock::success(&tool_use.id, output),
                                Err(err) => ToolResultBlock::error(&tool_use.id, err.to_string()),
                            });
                        }
                        thread.push(Message::tool_results(results));
                    }
                    StopReason::EndTurn | StopReason::StopSequence => {
                        yield Ok(AgentStreamEvent::Completed {
                            text,
                            tool_calls: tool_calls.clone(),
                            usage,
                        });
                        return;
                    }
                    StopReason::MaxTokens => {
                        yield Err(AgentError::MaxTokensExceeded);
                        return;
                    }
                    StopReason::ContentFiltered => {
                        yield Err(AgentError::ContentFiltered);
                        return;
                    }
                    StopReason::Unknown => {
                        yield Err(AgentError::UnexpectedStopReason("unknown".to_string()));
                        return;
                    }
                }
            }
        })
    }
}
