//! Conversation threads and their serialized form
//!
//! A [`ChatThread`] is the ordered message sequence that constitutes a
//! chat's state. Threads cross process boundaries as JSON objects
//! ("thread data"): a `messages` array plus underscore-prefixed metadata
//! fields stamped by the history manager. Every payload read back from the
//! cache or the object store passes schema validation before it is turned
//! into a thread again; payloads that fail validation are discarded and a
//! fresh thread is created instead.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{ContentBlock, Message, Role};

/// Average characters per token for the estimation heuristic
pub const AVG_CHARS_PER_TOKEN: usize = 4;

/// Metadata keys used in serialized thread data
pub mod meta {
    pub const CREATED_AT: &str = "_created_at";
    pub const UPDATED_AT: &str = "_updated_at";
    pub const PERSISTED_AT: &str = "_persisted_at";
    pub const MESSAGE_COUNT: &str = "_message_count";
    pub const PERSISTED: &str = "_persisted";
    pub const MERGE_COUNT: &str = "_merge_count";
    pub const SUMMARIZED: &str = "_summarized";
    pub const SUMMARY_TIMESTAMP: &str = "_summary_timestamp";
}

/// Errors produced when decoding thread data
#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("thread data failed schema validation")]
    SchemaValidation,

    #[error("thread serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An in-memory conversation thread
///
/// The message sequence is produced and mutated exclusively by the agent
/// loop; storage layers treat the serialized form as an opaque blob.
#[derive(Debug, Clone, Default)]
pub struct ChatThread {
    messages: Vec<Message>,
}

impl ChatThread {
    /// Create an empty thread
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages in the thread
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the thread holds no messages
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages, in order
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replace the full message sequence
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Estimate the token footprint of the thread
    ///
    /// Character-based heuristic: total text characters divided by four,
    /// with content lists flattened to their text blocks.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self.messages.iter().map(|m| m.text_len()).sum();
        chars / AVG_CHARS_PER_TOKEN
    }

    /// Serialize into thread data (a JSON object with a `messages` array)
    ///
    /// Metadata fields are stamped by the history manager, not here.
    pub fn to_data(&self) -> Result<Value, ThreadError> {
        let messages = serde_json::to_value(&self.messages)?;
        let mut map = Map::new();
        map.insert("messages".to_string(), messages);
        Ok(Value::Object(map))
    }

    /// Decode a validated thread data object back into a thread
    ///
    /// Underscore-prefixed metadata keys are ignored. Returns
    /// [`ThreadError::SchemaValidation`] if the payload does not satisfy
    /// [`validate_thread_data`]; callers fall back to a fresh thread.
    pub fn from_data(data: &Value) -> Result<Self, ThreadError> {
        if !validate_thread_data(data) {
            return Err(ThreadError::SchemaValidation);
        }

        let mut messages = Vec::new();
        if let Some(raw_messages) = data.get("messages").and_then(Value::as_array) {
            for raw in raw_messages {
                messages.push(decode_message(raw)?);
            }
        }

        Ok(Self { messages })
    }
}

/// Validate a thread data payload before deserialization
///
/// The payload must be a JSON object. If `messages` is present it must be
/// an array of objects whose `role` (when present) is one of
/// `system | user | assistant | tool | function` and whose `content` (when
/// present) is a string, an array of blocks, or null. Timestamp metadata
/// fields must be strings. Anything else is rejected; arbitrary payloads
/// are never deserialized.
pub fn validate_thread_data(data: &Value) -> bool {
    let obj = match data.as_object() {
        Some(obj) => obj,
        None => {
            tracing::warn!("thread data is not an object");
            return false;
        }
    };

    if let Some(messages) = obj.get("messages") {
        let list = match messages.as_array() {
            Some(list) => list,
            None => {
                tracing::warn!("thread messages is not an array");
                return false;
            }
        };

        for (index, msg) in list.iter().enumerate() {
            let msg = match msg.as_object() {
                Some(msg) => msg,
                None => {
                    tracing::warn!(index, "message is not an object");
                    return false;
                }
            };

            if let Some(role) = msg.get("role") {
                let valid = role
                    .as_str()
                    .map(|r| matches!(r, "system" | "user" | "assistant" | "tool" | "function"))
                    .unwrap_or(false);
                if !valid {
                    tracing::warn!(index, role = %role, "invalid message role");
                    return false;
                }
            }

            if let Some(content) = msg.get("content") {
                if !(content.is_string() || content.is_array() || content.is_null()) {
                    tracing::warn!(index, "invalid content type");
                    return false;
                }
            }
        }
    }

    for field in [meta::CREATED_AT, meta::UPDATED_AT, meta::PERSISTED_AT] {
        if let Some(value) = obj.get(field) {
            if !value.is_null() && !value.is_string() {
                tracing::warn!(field, "invalid metadata field type");
                return false;
            }
        }
    }

    true
}

/// Decode one raw message, tolerating the string-content shorthand
fn decode_message(raw: &Value) -> Result<Message, ThreadError> {
    // Fast path: the shape we write ourselves.
    if let Ok(message) = serde_json::from_value::<Message>(raw.clone()) {
        return Ok(message);
    }

    let obj = raw.as_object().ok_or(ThreadError::SchemaValidation)?;

    let role: Role = match obj.get("role") {
        Some(role) => serde_json::from_value(role.clone())?,
        None => Role::User,
    };

    let content = match obj.get("content") {
        Some(Value::String(text)) => vec![ContentBlock::Text(text.clone())],
        Some(Value::Array(blocks)) => {
            let mut decoded = Vec::with_capacity(blocks.len());
            for block in blocks {
                decoded.push(decode_block(block)?);
            }
            decoded
        }
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(ThreadError::SchemaValidation),
    };

    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);

    Ok(Message {
        role,
        content,
        timestamp,
    })
}

/// Decode one content block, tolerating bare strings and `{text: ...}` maps
fn decode_block(raw: &Value) -> Result<ContentBlock, ThreadError> {
    if let Value::String(text) = raw {
        return Ok(ContentBlock::Text(text.clone()));
    }
    if let Ok(block) = serde_json::from_value::<ContentBlock>(raw.clone()) {
        return Ok(block);
    }
    if let Some(text) = raw.get("text").and_then(Value::as_str) {
        return Ok(ContentBlock::Text(text.to_string()));
    }
    Err(ThreadError::SchemaValidation)
}
