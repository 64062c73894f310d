//! Conversation memory: hot cache + cold persistence
//!
//! The chat history manager orchestrates the two storage tiers with
//! automatic fallback when the cache is unavailable, merge logic when
//! persisting, background persist scheduling, and context summarization
//! for long conversations.

pub mod cache;
pub mod manager;
pub mod persistence;
pub mod summarize;

pub use cache::{CacheConfig, CacheError, HotCache, InMemoryCache};
pub use manager::{ChatHistoryManager, ChatSession, MemoryConfig, MemoryError};
pub use persistence::{parse_schedule, ColdStore, PersistenceConfig, StoreError};
pub use summarize::SummarizationConfig;
