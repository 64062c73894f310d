//! Context summarization for long conversations
//!
//! When a thread's estimated token footprint exceeds the configured
//! budget, the older part of the conversation is compacted into a single
//! synthetic system message and only the most recent messages are kept.
//! On any failure the original thread is left untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::memory::manager::ChatHistoryManager;
use crate::model::ChatModel;
use crate::thread::ChatThread;
use crate::types::Message;

/// Truncation bound applied to each source message before it is fed to
/// the summary prompt
const MAX_MESSAGE_CHARS: usize = 1000;

/// Configuration for context summarization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Token budget above which a thread is compacted
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Target size of the generated summary
    #[serde(default = "default_target_tokens")]
    pub summary_target_tokens: usize,
    /// How many recent messages survive compaction verbatim
    #[serde(default = "default_recent")]
    pub recent_messages_to_keep: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_max_tokens() -> usize {
    8000
}

fn default_target_tokens() -> usize {
    2000
}

fn default_recent() -> usize {
    5
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_tokens: default_max_tokens(),
            summary_target_tokens: default_target_tokens(),
            recent_messages_to_keep: default_recent(),
        }
    }
}

impl ChatHistoryManager {
    /// Whether a session currently exceeds its token budget
    pub async fn needs_summarization(&self, chat_id: &str) -> bool {
        if !self.config.summarization.enabled {
            return false;
        }
        let sessions = self.sessions.lock().await;
        let Some(session) = sessions.get(chat_id) else {
            return false;
        };
        let thread = session.thread.clone();
        drop(sessions);

        let estimated = thread.lock().await.estimated_tokens();
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(chat_id) {
                session.estimated_tokens = estimated;
            }
        }
        estimated > self.config.summarization.max_tokens
    }

    /// Compact the conversation when it exceeds its token budget
    ///
    /// Splits off everything but the most recent messages, asks the model
    /// for a concise summary on a fresh context, and atomically replaces
    /// the session's thread with `[summary system message] + recent`.
    /// Returns true only when compaction actually happened; on any failure
    /// the original thread is retained and the session is not mutated.
    pub async fn summarize_if_needed(&self, chat_id: &str, model: &Arc<dyn ChatModel>) -> bool {
        if !self.needs_summarization(chat_id).await {
            return false;
        }

        let thread_arc = {
            let sessions = self.sessions.lock().await;
            match sessions.get(chat_id) {
                Some(session) => session.thread.clone(),
                None => return false,
            }
        };

        let keep = self.config.summarization.recent_messages_to_keep;
        let (old_messages, recent_messages, old_len) = {
            let thread = thread_arc.lock().await;
            let messages = thread.messages();
            if messages.len() <= keep {
                tracing::debug!(chat_id, count = messages.len(), "not enough messages to summarize");
                return false;
            }
            let split = messages.len() - keep;
            (
                messages[..split].to_vec(),
                messages[split..].to_vec(),
                messages.len(),
            )
        };

        tracing::info!(
            chat_id,
            old_messages = old_messages.len(),
            "starting conversation summarization"
        );

        let summary = match self.generate_summary(model, &old_messages).await {
            Some(summary) if !summary.trim().is_empty() => summary,
            _ => {
                tracing::warn!(chat_id, "failed to generate summary");
                return false;
            }
        };

        let mut new_thread = ChatThread::new();
        new_thread.push(Message::system(format!(
            "[CONVERSATION SUMMARY]\n{}\n[END SUMMARY]\n\nThe conversation continues below:",
            summary
        )));
        for message in recent_messages {
            new_thread.push(message);
        }
        let new_tokens = new_thread.estimated_tokens();

        {
            let mut thread = thread_arc.lock().await;
            *thread = new_thread.clone();
        }
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(chat_id) {
                session.summarized = true;
                session.summary_count += 1;
                session.estimated_tokens = new_tokens;
                session.message_count = new_thread.len();
            }
        }

        self.save_thread(chat_id, &new_thread, false).await;

        tracing::info!(
            chat_id,
            old_message_count = old_len,
            new_message_count = new_thread.len(),
            new_tokens,
            "conversation summarized"
        );
        true
    }

    async fn generate_summary(
        &self,
        model: &Arc<dyn ChatModel>,
        messages: &[Message],
    ) -> Option<String> {
        let conversation = format_messages_for_summary(messages);
        let prompt = format!(
            "Please provide a concise summary of the following conversation.\n\
             Focus on:\n\
             1. Key topics discussed\n\
             2. Important decisions or conclusions\n\
             3. Any action items or pending questions\n\
             4. Context that would be needed to continue the conversation\n\n\
             Keep the summary under {} tokens.\n\n\
             CONVERSATION:\n{}\n\nSUMMARY:",
            self.config.summarization.summary_target_tokens, conversation
        );

        // A fresh context: the summary request must not pollute the
        // conversation thread.
        match model
            .generate(vec![Message::user(prompt)], Vec::new(), None)
            .await
        {
            Ok(response) => Some(response.message.text()),
            Err(err) => {
                tracing::error!(error = %err, "summary generation failed");
                None
            }
        }
    }
}

/// Format messages as `ROLE: text` lines, truncating long ones
fn format_messages_for_summary(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| {
            let mut content = message.text();
            if content.len() > MAX_MESSAGE_CHARS {
                let mut end = MAX_MESSAGE_CHARS;
                while end > 0 && !content.is_char_boundary(end) {
                    end -= 1;
                }
                content.truncate(end);
                content.push_str("...[truncated]");
            }
            format!("{}: {}", message.role.to_string().to_uppercase(), content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::cache::CacheConfig;
    use crate::memory::manager::MemoryConfig;
    use crate::memory::persistence::PersistenceConfig;
    use crate::test_utils::MockModel;
    use crate::types::Role;

    fn manager(max_tokens: usize, keep: usize) -> Arc<ChatHistoryManager> {
        let config = MemoryConfig {
            cache: CacheConfig::default(),
            persistence: PersistenceConfig::default(),
            summarization: SummarizationConfig {
                enabled: true,
                max_tokens,
                summary_target_tokens: 100,
                recent_messages_to_keep: keep,
            },
        };
        Arc::new(ChatHistoryManager::new(config, None, None, None).unwrap())
    }

    async fn filled_thread(m: &Arc<ChatHistoryManager>, chat_id: &str, messages: usize) {
        let (_, thread) = m.get_or_create_thread(Some(chat_id)).await.unwrap();
        let mut thread = thread.lock().await;
        for i in 0..messages {
            thread.push(Message::user(format!("message {} {}", i, "x".repeat(200))));
        }
    }

    #[tokio::test]
    async fn test_summarizes_over_budget() {
        let m = manager(100, 2);
        filled_thread(&m, "c1", 10).await;

        let model: Arc<dyn ChatModel> =
            Arc::new(MockModel::new().with_text("the user discussed many things"));
        assert!(m.summarize_if_needed("c1", &model).await);

        let (_, thread) = m.get_or_create_thread(Some("c1")).await.unwrap();
        let thread = thread.lock().await;
        // Summary system message plus the two retained messages.
        assert_eq!(thread.len(), 3);
        assert_eq!(thread.messages()[0].role, Role::System);
        assert!(thread.messages()[0].text().contains("[CONVERSATION SUMMARY]"));
        assert!(thread.messages()[0].text().contains("many things"));
        assert!(thread.messages()[2].text().contains("message 9"));
    }

    #[tokio::test]
    async fn test_summarization_reduces_tokens() {
        let m = manager(100, 2);
        filled_thread(&m, "c1", 10).await;

        let before = {
            let sessions = m.sessions.lock().await;
            sessions["c1"].thread.clone()
        };
        let before_tokens = before.lock().await.estimated_tokens();

        let model: Arc<dyn ChatModel> = Arc::new(MockModel::new().with_text("short"));
        assert!(m.summarize_if_needed("c1", &model).await);

        let sessions = m.sessions.lock().await;
        let session = &sessions["c1"];
        assert!(session.estimated_tokens < before_tokens);
        assert_eq!(session.summary_count, 1);
        assert!(session.summarized);
    }

    #[tokio::test]
    async fn test_under_budget_not_summarized() {
        let m = manager(1_000_000, 2);
        filled_thread(&m, "c1", 10).await;

        let model: Arc<dyn ChatModel> = Arc::new(MockModel::new().with_text("unused"));
        assert!(!m.summarize_if_needed("c1", &model).await);
    }

    #[tokio::test]
    async fn test_too_few_messages_not_summarized() {
        // Over budget, but the thread is exactly recent_messages_to_keep
        // long: there is nothing to split off.
        let m = manager(10, 3);
        filled_thread(&m, "c1", 3).await;

        let model: Arc<dyn ChatModel> = Arc::new(MockModel::new().with_text("unused"));
        assert!(!m.summarize_if_needed("c1", &model).await);

        let (_, thread) = m.get_or_create_thread(Some("c1")).await.unwrap();
        assert_eq!(thread.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_model_failure_retains_original() {
        let m = manager(100, 2);
        filled_thread(&m, "c1", 10).await;

        let model: Arc<dyn ChatModel> = Arc::new(MockModel::new().failing("model down"));
        assert!(!m.summarize_if_needed("c1", &model).await);

        let (_, thread) = m.get_or_create_thread(Some("c1")).await.unwrap();
        let thread = thread.lock().await;
        assert_eq!(thread.len(), 10);

        let sessions = m.sessions.lock().await;
        assert_eq!(sessions["c1"].summary_count, 0);
        assert!(!sessions["c1"].summarized);
    }

    #[tokio::test]
    async fn test_disabled_summarization() {
        let mut m = manager(100, 2);
        Arc::get_mut(&mut m).unwrap().config.summarization.enabled = false;
        filled_thread(&m, "c1", 10).await;

        let model: Arc<dyn ChatModel> = Arc::new(MockModel::new().with_text("unused"));
        assert!(!m.summarize_if_needed("c1", &model).await);
    }

    #[test]
    fn test_format_truncates_long_messages() {
        let messages = vec![Message::user("y".repeat(2000))];
        let formatted = format_messages_for_summary(&messages);
        assert!(formatted.starts_with("USER: "));
        assert!(formatted.ends_with("...[truncated]"));
        assert!(formatted.len() < 1100);
    }
}
