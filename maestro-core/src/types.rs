//! Provider-agnostic types for messages and tools
//!
//! These types abstract over LM backends, allowing the agent loop, the chat
//! history manager, and the workflow engine to share one message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Tool result messages. `function` is accepted as a legacy alias when
    /// deserializing persisted threads.
    #[serde(alias = "function")]
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation
///
/// Every message carries a timestamp; the persistence merge heuristic
/// dedupes by `(content, timestamp)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message with the given role and content blocks
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a new system message with text content
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::Text(text.into())])
    }

    /// Create a new user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::Text(text.into())])
    }

    /// Create a new assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::Text(text.into())])
    }

    /// Create a new tool message carrying tool results
    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self::new(
            Role::Tool,
            results.into_iter().map(ContentBlock::ToolResult).collect(),
        )
    }

    /// Create an assistant message with arbitrary content blocks
    pub fn assistant_with_content(content: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Get all text content concatenated
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Get all tool use blocks
    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::ToolUse(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Total characters of text content, counting text inside tool results
    ///
    /// Used by the token estimation heuristic (`chars / 4`).
    pub fn text_len(&self) -> usize {
        self.content
            .iter()
            .map(|c| match c {
                ContentBlock::Text(t) => t.len(),
                ContentBlock::ToolUse(t) => t.input.to_string().len(),
                ContentBlock::ToolResult(r) => r.content.len(),
            })
            .sum()
    }
}

/// Content block within a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text(String),
    /// Tool use request from the assistant
    ToolUse(ToolUseBlock),
    /// Tool result fed back to the model
    ToolResult(ToolResultBlock),
}

/// A tool use request from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Unique ID for this tool use (matched by the result)
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// Input arguments as a JSON object
    pub input: Value,
}

/// Status of a tool execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

/// Result of a tool execution, fed back to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// ID of the tool use this result answers
    pub tool_use_id: String,
    /// Result content as text
    pub content: String,
    /// Whether the tool succeeded
    pub status: ToolResultStatus,
}

impl ToolResultBlock {
    /// Create a successful tool result
    pub fn success(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            status: ToolResultStatus::Success,
        }
    }

    /// Create a failed tool result
    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            status: ToolResultStatus::Error,
        }
    }
}

/// Definition of a tool as presented to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's input
    pub input_schema: Value,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn
    EndTurn,
    /// The model wants to use one or more tools
    ToolUse,
    /// Output token limit reached
    MaxTokens,
    /// Response was filtered by content moderation
    ContentFiltered,
    /// A configured stop sequence fired
    StopSequence,
    /// Unrecognized stop reason from the backend
    Unknown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::ToolUse => write!(f, "tool_use"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::ContentFiltered => write!(f, "content_filtered"),
            StopReason::StopSequence => write!(f, "stop_sequence"),
            StopReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Token usage reported by the model backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_text_concatenates_blocks() {
        let msg = Message::assistant_with_content(vec![
            ContentBlock::Text("Hello ".to_string()),
            ContentBlock::ToolUse(ToolUseBlock {
                id: "t1".to_string(),
                name: "lookup".to_string(),
                input: json!({"q": "x"}),
            }),
            ContentBlock::Text("world".to_string()),
        ]);
        assert_eq!(msg.text(), "Hello world");
        assert_eq!(msg.tool_uses().len(), 1);
    }

    #[test]
    fn test_role_serde_roundtrip() {
        let json = serde_json::to_string(&Role::Tool).unwrap();
        assert_eq!(json, "\"tool\"");
        let role: Role = serde_json::from_str("\"function\"").unwrap();
        assert_eq!(role, Role::Tool);
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
    }

    #[test]
    fn test_invalid_role_rejected() {
        let result: Result<Role, _> = serde_json::from_str("\"wizard\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_content_block_tagged_serialization() {
        let block = ContentBlock::Text("hi".to_string());
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "text");
    }

    #[test]
    fn test_tool_result_constructors() {
        let ok = ToolResultBlock::success("id1", "42");
        assert_eq!(ok.status, ToolResultStatus::Success);
        let err = ToolResultBlock::error("id1", "boom");
        assert_eq!(err.status, ToolResultStatus::Error);
    }

    #[test]
    fn test_text_len_counts_tool_content() {
        let msg = Message::tool_results(vec![ToolResultBlock::success("a", "12345")]);
        assert_eq!(msg.text_len(), 5);
    }
}
