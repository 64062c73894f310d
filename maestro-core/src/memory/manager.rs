//! Chat history manager
//!
//! Resolves chat IDs to threads across process memory, the hot cache, and
//! the cold store; persists with merge so concurrent flushes from other
//! nodes are not lost; and runs a background task that persists cached
//! chats before their TTL runs out.
//!
//! Thread resolution is serialized by one session-creation lock: two
//! concurrent requests for the same `chat_id` can never install divergent
//! sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::memory::cache::{CacheConfig, CacheError, HotCache, InMemoryCache};
use crate::memory::persistence::{parse_schedule, ColdStore, PersistenceConfig, StoreError};
use crate::memory::summarize::SummarizationConfig;
use crate::metrics::MetricsCollector;
use crate::responses::ChatListItem;
use crate::thread::{meta, ChatThread, ThreadError};

/// Complete memory configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    pub cache: CacheConfig,
    pub persistence: PersistenceConfig,
    pub summarization: SummarizationConfig,
}

/// Errors from the memory subsystem
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Thread(#[from] ThreadError),
}

/// An active chat session
///
/// Owned exclusively by the manager; the thread itself sits behind a
/// mutex that serializes agent runs against the same chat.
pub struct ChatSession {
    pub chat_id: String,
    pub thread: Arc<Mutex<ChatThread>>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub message_count: usize,
    pub persisted: bool,
    pub summarized: bool,
    pub summary_count: u32,
    pub estimated_tokens: usize,
    /// MCP server name -> session_id, for stateful external tools
    pub mcp_sessions: HashMap<String, String>,
}

impl ChatSession {
    fn new(chat_id: String, thread: ChatThread) -> Self {
        let now = Utc::now();
        Self {
            chat_id,
            thread: Arc::new(Mutex::new(thread)),
            created_at: now,
            last_accessed: now,
            message_count: 0,
            persisted: false,
            summarized: false,
            summary_count: 0,
            estimated_tokens: 0,
            mcp_sessions: HashMap::new(),
        }
    }
}

/// Orchestrates chat history across cache and persistence tiers
pub struct ChatHistoryManager {
    pub(crate) config: MemoryConfig,
    cache: Arc<dyn HotCache>,
    persistence: Option<Arc<dyn ColdStore>>,
    /// Session map and session-creation lock in one
    pub(crate) sessions: Mutex<HashMap<String, ChatSession>>,
    persist_at: u64,
    running: AtomicBool,
    persist_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl std::fmt::Debug for ChatHistoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHistoryManager")
            .field("config", &self.config)
            .field("persist_at", &self.persist_at)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ChatHistoryManager {
    /// Create a manager
    ///
    /// `cache` is the external hot cache; when absent an in-process cache
    /// with the configured TTL is used. `persistence` enables the cold
    /// tier. The persist schedule expression is validated here: an
    /// unsupported form is a configuration error, not a guess.
    pub fn new(
        config: MemoryConfig,
        cache: Option<Arc<dyn HotCache>>,
        persistence: Option<Arc<dyn ColdStore>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, MemoryError> {
        let persist_at = if config.persistence.enabled {
            parse_schedule(&config.persistence.schedule).map_err(MemoryError::Config)?
        } else {
            0
        };

        let cache = cache.unwrap_or_else(|| {
            Arc::new(InMemoryCache::new(Duration::from_secs(config.cache.ttl)))
                as Arc<dyn HotCache>
        });

        tracing::info!(
            cache_enabled = config.cache.enabled,
            persistence_enabled = config.persistence.enabled,
            "chat history manager initialized"
        );

        Ok(Self {
            config,
            cache,
            persistence,
            sessions: Mutex::new(HashMap::new()),
            persist_at,
            running: AtomicBool::new(false),
            persist_task: parking_lot::Mutex::new(None),
            metrics,
        })
    }

    fn cache_key(&self, chat_id: &str) -> String {
        format!("{}{}", self.config.cache.prefix, chat_id)
    }

    /// Get an existing thread or create a new one
    ///
    /// Resolution order: process memory, hot cache, cold store (warming
    /// the cache), then creation. A provided but unknown `chat_id` gets a
    /// fresh thread under that ID. The whole resolution runs under the
    /// session-creation lock.
    pub async fn get_or_create_thread(
        &self,
        chat_id: Option<&str>,
    ) -> Result<(String, Arc<Mutex<ChatThread>>), MemoryError> {
        let mut sessions = self.sessions.lock().await;

        let chat_id = match chat_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let chat_id = Uuid::new_v4().to_string();
                tracing::info!(chat_id = %chat_id, "generated new chat_id");
                return Ok(Self::create_session(&mut sessions, chat_id, &self.metrics));
            }
        };

        if let Some(session) = sessions.get_mut(&chat_id) {
            session.last_accessed = Utc::now();
            tracing::debug!(chat_id = %chat_id, "returning existing session from memory");
            return Ok((chat_id.clone(), session.thread.clone()));
        }

        let cache_key = self.cache_key(&chat_id);
        match self.cache.get(&cache_key).await {
            Ok(Some(cached)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_access(true);
                }
                tracing::info!(chat_id = %chat_id, "loading thread from cache");
                return Ok(self.restore_session(&mut sessions, chat_id, &cached));
            }
            Ok(None) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_access(false);
                }
            }
            Err(err) => {
                tracing::warn!(chat_id = %chat_id, error = %err, "cache lookup failed");
            }
        }

        if self.config.persistence.enabled {
            if let Some(store) = &self.persistence {
                match store.get(&chat_id).await {
                    Ok(Some(persisted)) => {
                        tracing::info!(chat_id = %chat_id, "loading thread from cold store");
                        // Warm the cache with the restored blob.
                        if let Err(err) = self.cache.set(&cache_key, &persisted, None).await {
                            tracing::warn!(error = %err, "failed to warm cache");
                        }
                        return Ok(self.restore_session(&mut sessions, chat_id, &persisted));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(chat_id = %chat_id, error = %err, "cold store lookup failed");
                    }
                }
            }
        }

        tracing::info!(chat_id = %chat_id, "creating new thread with provided chat_id");
        Ok(Self::create_session(&mut sessions, chat_id, &self.metrics))
    }

    fn create_session(
        sessions: &mut HashMap<String, ChatSession>,
        chat_id: String,
        metrics: &Option<Arc<MetricsCollector>>,
    ) -> (String, Arc<Mutex<ChatThread>>) {
        let session = ChatSession::new(chat_id.clone(), ChatThread::new());
        let thread = session.thread.clone();
        sessions.insert(chat_id.clone(), session);
        if let Some(metrics) = metrics {
            metrics.record_session_start();
        }
        (chat_id, thread)
    }

    /// Restore a session from serialized thread data
    ///
    /// Schema validation gates deserialization; a payload that fails it is
    /// discarded and a fresh thread is created under the same `chat_id`.
    fn restore_session(
        &self,
        sessions: &mut HashMap<String, ChatSession>,
        chat_id: String,
        data: &Value,
    ) -> (String, Arc<Mutex<ChatThread>>) {
        let thread = match ChatThread::from_data(data) {
            Ok(thread) => thread,
            Err(err) => {
                tracing::error!(
                    chat_id = %chat_id,
                    error = %err,
                    "thread data failed validation, creating new session"
                );
                return Self::create_session(sessions, chat_id, &self.metrics);
            }
        };

        let mut session = ChatSession::new(chat_id.clone(), thread);
        if let Some(created_at) = data
            .get(meta::CREATED_AT)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            session.created_at = created_at.with_timezone(&Utc);
        }
        session.message_count = data
            .get(meta::MESSAGE_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        session.persisted = data
            .get(meta::PERSISTED)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let thread = session.thread.clone();
        sessions.insert(chat_id.clone(), session);
        if let Some(metrics) = &self.metrics {
            metrics.record_session_start();
        }
        (chat_id, thread)
    }

    /// Save a thread to the cache, and to the cold store when forced or
    /// when the cache write fails
    ///
    /// Returns false on failure; save failures never panic the request
    /// path.
    pub async fn save_thread(&self, chat_id: &str, thread: &ChatThread, force_persist: bool) -> bool {
        let mut data = match thread.to_data() {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(chat_id, error = %err, "failed to serialize thread");
                return false;
            }
        };

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get_mut(chat_id) {
                session.last_accessed = Utc::now();
                session.message_count = thread.len();
                session.estimated_tokens = thread.estimated_tokens();

                let obj = data.as_object_mut().expect("thread data is an object");
                obj.insert(
                    meta::CREATED_AT.to_string(),
                    Value::String(session.created_at.to_rfc3339()),
                );
                obj.insert(
                    meta::MESSAGE_COUNT.to_string(),
                    Value::Number(session.message_count.into()),
                );
                if session.summarized {
                    obj.insert(meta::SUMMARIZED.to_string(), Value::Bool(true));
                }
            }
        }

        data.as_object_mut()
            .expect("thread data is an object")
            .insert(
                meta::UPDATED_AT.to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );

        let cache_key = self.cache_key(chat_id);
        let cached = match self.cache.set(&cache_key, &data, None).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(chat_id, error = %err, "cache write failed");
                false
            }
        };

        if (force_persist || !cached) && self.config.persistence.enabled {
            self.persist_with_merge(chat_id, data).await;
        }

        true
    }

    /// Persist to the cold store, merging with any existing blob
    pub(crate) async fn persist_with_merge(&self, chat_id: &str, new_data: Value) -> bool {
        let Some(store) = &self.persistence else {
            return false;
        };

        let existing = match store.get(chat_id).await {
            Ok(existing) => existing,
            Err(err) => {
                tracing::error!(chat_id, error = %err, "persist read failed");
                return false;
            }
        };

        let mut merged = match existing {
            Some(existing) => {
                let merge_count = existing
                    .get(meta::MERGE_COUNT)
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let mut merged = merge_thread_data(existing, new_data);
                merged.as_object_mut().expect("merged data is an object").insert(
                    meta::MERGE_COUNT.to_string(),
                    Value::Number((merge_count + 1).into()),
                );
                merged
            }
            None => new_data,
        };

        let obj = merged.as_object_mut().expect("merged data is an object");
        obj.insert(meta::PERSISTED.to_string(), Value::Bool(true));
        obj.insert(
            meta::PERSISTED_AT.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        match store.save(chat_id, &merged).await {
            Ok(()) => {
                let mut sessions = self.sessions.lock().await;
                if let Some(session) = sessions.get_mut(chat_id) {
                    session.persisted = true;
                }
                true
            }
            Err(err) => {
                tracing::error!(chat_id, error = %err, "persist write failed");
                false
            }
        }
    }

    /// Delete a chat from every tier
    pub async fn delete_chat(&self, chat_id: &str) -> bool {
        let mut success = true;

        if let Err(err) = self.cache.delete(&self.cache_key(chat_id)).await {
            tracing::warn!(chat_id, error = %err, "cache delete failed");
        }

        if self.config.persistence.enabled {
            if let Some(store) = &self.persistence {
                if let Err(err) = store.delete(chat_id).await {
                    tracing::warn!(chat_id, error = %err, "store delete failed");
                    success = false;
                }
            }
        }

        if self.sessions.lock().await.remove(chat_id).is_some() {
            if let Some(metrics) = &self.metrics {
                metrics.record_session_end();
            }
        }
        success
    }

    /// List known chats from the requested tiers
    pub async fn list_chats(&self, source: &str, limit: usize) -> Vec<ChatListItem> {
        let mut results: Vec<ChatListItem> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        {
            let sessions = self.sessions.lock().await;
            for (chat_id, session) in sessions.iter() {
                if results.len() >= limit {
                    break;
                }
                results.push(ChatListItem {
                    chat_id: chat_id.clone(),
                    active: true,
                    created_at: Some(session.created_at.to_rfc3339()),
                    last_accessed: Some(session.last_accessed.to_rfc3339()),
                    message_count: session.message_count,
                    persisted: session.persisted,
                    source: Some("memory".to_string()),
                    ttl_remaining: None,
                });
                seen.insert(chat_id.clone());
            }
        }

        if matches!(source, "cache" | "all") {
            if let Ok(keys) = self.cache.scan().await {
                for key in keys {
                    let Some(chat_id) = key.strip_prefix(&self.config.cache.prefix) else {
                        continue;
                    };
                    if seen.contains(chat_id) || results.len() >= limit {
                        continue;
                    }
                    let ttl_remaining = self.cache.ttl(&key).await.ok().flatten();
                    results.push(ChatListItem {
                        chat_id: chat_id.to_string(),
                        active: false,
                        created_at: None,
                        last_accessed: None,
                        message_count: 0,
                        persisted: false,
                        source: Some("cache".to_string()),
                        ttl_remaining,
                    });
                    seen.insert(chat_id.to_string());
                }
            }
        }

        if matches!(source, "persistence" | "all") && self.config.persistence.enabled {
            if let Some(store) = &self.persistence {
                if let Ok(keys) = store.list(limit).await {
                    for chat_id in keys {
                        if seen.contains(&chat_id) || results.len() >= limit {
                            continue;
                        }
                        results.push(ChatListItem {
                            chat_id: chat_id.clone(),
                            active: false,
                            created_at: None,
                            last_accessed: None,
                            message_count: 0,
                            persisted: true,
                            source: Some("persistence".to_string()),
                            ttl_remaining: None,
                        });
                        seen.insert(chat_id);
                    }
                }
            }
        }

        results
    }

    /// Start the background persist task
    ///
    /// Wakes every `min(60, persist_at / 4)` seconds and persists any
    /// cached chat whose remaining TTL has dropped to `persist_at` or
    /// less. No-op when persistence is disabled or already running.
    pub async fn start_background_persist(self: &Arc<Self>) {
        if !self.config.persistence.enabled {
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.background_persist_loop().await;
        });
        *self.persist_task.lock() = Some(handle);
        tracing::info!("started background persist task");
    }

    async fn background_persist_loop(&self) {
        let cache_ttl = self.config.cache.ttl;
        let check_interval = Duration::from_secs((self.persist_at / 4).clamp(1, 60));

        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(check_interval).await;

            let keys = match self.cache.scan().await {
                Ok(keys) => keys,
                Err(err) => {
                    tracing::warn!(error = %err, "background persist scan failed");
                    continue;
                }
            };

            for key in keys {
                let Some(chat_id) = key.strip_prefix(&self.config.cache.prefix) else {
                    continue;
                };
                let ttl = match self.cache.ttl(&key).await {
                    Ok(Some(ttl)) => ttl,
                    _ => continue,
                };
                if ttl <= cache_ttl.saturating_sub(self.persist_at) {
                    tracing::info!(chat_id, ttl, "auto-persisting before TTL expiry");
                    if let Ok(Some(cached)) = self.cache.get(&key).await {
                        self.persist_with_merge(chat_id, cached).await;
                    }
                }
            }
        }
    }

    /// Stop the background task, persist all unpersisted sessions, close
    /// the tiers, and clear memory
    ///
    /// Per-session persist failures are logged and do not stop the drain.
    pub async fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.persist_task.lock().take() {
            handle.abort();
        }

        if self.config.persistence.enabled {
            let drained: Vec<(String, Arc<Mutex<ChatThread>>, bool)> = {
                let sessions = self.sessions.lock().await;
                sessions
                    .values()
                    .map(|s| (s.chat_id.clone(), s.thread.clone(), s.persisted))
                    .collect()
            };

            for (chat_id, thread, persisted) in drained {
                if persisted {
                    continue;
                }
                let data = {
                    let thread = thread.lock().await;
                    thread.to_data()
                };
                match data {
                    Ok(data) => {
                        if !self.persist_with_merge(&chat_id, data).await {
                            tracing::warn!(chat_id = %chat_id, "failed to persist on close");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(chat_id = %chat_id, error = %err, "failed to serialize on close");
                    }
                }
            }
        }

        if let Err(err) = self.cache.close().await {
            tracing::warn!(error = %err, "cache close failed");
        }
        if let Some(store) = &self.persistence {
            if let Err(err) = store.close().await {
                tracing::warn!(error = %err, "store close failed");
            }
        }

        self.sessions.lock().await.clear();
        tracing::info!("chat history manager closed");
    }
}

/// Merge two thread data blobs
///
/// New values override existing ones, the original creation time is
/// preserved, and messages prefer the longer list; when neither list is a
/// superset, the union is deduplicated by `(content, timestamp)` in order.
pub(crate) fn merge_thread_data(existing: Value, new: Value) -> Value {
    let existing_obj = existing.as_object().cloned().unwrap_or_default();
    let new_obj = new.as_object().cloned().unwrap_or_default();

    let mut merged = existing_obj.clone();
    for (key, value) in &new_obj {
        merged.insert(key.clone(), value.clone());
    }

    if let Some(created_at) = existing_obj.get(meta::CREATED_AT) {
        merged.insert(meta::CREATED_AT.to_string(), created_at.clone());
    }

    let existing_msgs = existing_obj
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let new_msgs = new_obj
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let combined = if new_msgs.len() >= existing_msgs.len() {
        new_msgs
    } else {
        let mut seen = std::collections::HashSet::new();
        let mut all = Vec::new();
        for msg in existing_msgs.into_iter().chain(new_msgs) {
            let key = format!(
                "{}{}",
                msg.get("content").map(Value::to_string).unwrap_or_default(),
                msg.get("timestamp").map(Value::to_string).unwrap_or_default(),
            );
            if seen.insert(key) {
                all.push(msg);
            }
        }
        all
    };
    merged.insert("messages".to_string(), Value::Array(combined));

    Value::Object(merged)
}

/// Build an empty thread-data object (used by tests and tools)
pub fn empty_thread_data() -> Value {
    Value::Object(Map::from_iter([(
        "messages".to_string(),
        Value::Array(Vec::new()),
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryStore;
    use crate::types::Message;
    use serde_json::json;

    fn config(persistence: bool) -> MemoryConfig {
        MemoryConfig {
            cache: CacheConfig {
                enabled: false,
                ttl: 3600,
                ..Default::default()
            },
            persistence: PersistenceConfig {
                enabled: persistence,
                schedule: "ttl+300".to_string(),
                ..Default::default()
            },
            summarization: SummarizationConfig::default(),
        }
    }

    fn manager(persistence: Option<Arc<dyn ColdStore>>) -> Arc<ChatHistoryManager> {
        Arc::new(
            ChatHistoryManager::new(config(persistence.is_some()), None, persistence, None)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_new_chat_id_generated() {
        let m = manager(None);
        let (chat_id, thread) = m.get_or_create_thread(None).await.unwrap();
        assert!(!chat_id.is_empty());
        assert!(thread.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_same_chat_id_returns_same_session() {
        let m = manager(None);
        let (chat_id, thread_a) = m.get_or_create_thread(Some("c1")).await.unwrap();
        assert_eq!(chat_id, "c1");

        thread_a.lock().await.push(Message::user("hello"));

        let (_, thread_b) = m.get_or_create_thread(Some("c1")).await.unwrap();
        assert!(Arc::ptr_eq(&thread_a, &thread_b));
        assert_eq!(thread_b.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_single_session() {
        let m = manager(None);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let m = m.clone();
            handles.push(tokio::spawn(async move {
                let (_, thread) = m.get_or_create_thread(Some("raced")).await.unwrap();
                Arc::as_ptr(&thread) as usize
            }));
        }

        let mut pointers = Vec::new();
        for handle in handles {
            pointers.push(handle.await.unwrap());
        }
        pointers.dedup();
        assert_eq!(pointers.len(), 1);
    }

    #[tokio::test]
    async fn test_save_then_restore_from_cache() {
        let m = manager(None);
        let (chat_id, thread) = m.get_or_create_thread(Some("c1")).await.unwrap();
        {
            let mut t = thread.lock().await;
            t.push(Message::user("question"));
            t.push(Message::assistant("answer"));
            assert!(m.save_thread(&chat_id, &t, false).await);
        }

        // Drop the in-memory session to force a cache read.
        m.sessions.lock().await.clear();

        let (_, restored) = m.get_or_create_thread(Some("c1")).await.unwrap();
        assert_eq!(restored.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_restore_from_cold_store_warms_cache() {
        let store = Arc::new(MemoryStore::new());
        let m = manager(Some(store.clone()));

        let (chat_id, thread) = m.get_or_create_thread(Some("c1")).await.unwrap();
        {
            let mut t = thread.lock().await;
            t.push(Message::user("persisted question"));
            assert!(m.save_thread(&chat_id, &t, true).await);
        }

        // Simulate a process restart: memory and cache gone, store kept.
        let m2 = manager(Some(store.clone()));
        let (_, restored) = m2.get_or_create_thread(Some("c1")).await.unwrap();
        assert_eq!(restored.lock().await.len(), 1);

        // Write-through: the blob is now in m2's cache.
        let cached = m2.cache.get("chat:c1").await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn test_invalid_payload_never_becomes_thread() {
        let m = manager(None);
        m.cache
            .set(
                "chat:poisoned",
                &json!({"messages": [{"role": "wizard", "content": "x"}]}),
                None,
            )
            .await
            .unwrap();

        let (chat_id, thread) = m.get_or_create_thread(Some("poisoned")).await.unwrap();
        assert_eq!(chat_id, "poisoned");
        assert!(thread.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_persisted_metadata_invariants() {
        let store = Arc::new(MemoryStore::new());
        let m = manager(Some(store.clone()));

        let (chat_id, thread) = m.get_or_create_thread(Some("c1")).await.unwrap();
        {
            let mut t = thread.lock().await;
            t.push(Message::user("one"));
            m.save_thread(&chat_id, &t, true).await;
            t.push(Message::assistant("two"));
            m.save_thread(&chat_id, &t, true).await;
        }

        let blob = store.get("c1").await.unwrap().unwrap();
        let created: DateTime<Utc> = blob[meta::CREATED_AT]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        let updated: DateTime<Utc> = blob[meta::UPDATED_AT]
            .as_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(created <= updated);
        assert_eq!(blob[meta::MESSAGE_COUNT], json!(2));
        assert_eq!(blob[meta::PERSISTED], json!(true));
        assert_eq!(blob[meta::MERGE_COUNT], json!(1));
    }

    #[tokio::test]
    async fn test_merge_prefers_longer_list() {
        let existing = json!({
            "messages": [{"content": "a", "timestamp": "t1"}],
            "_created_at": "2024-01-01T00:00:00+00:00",
        });
        let new = json!({
            "messages": [
                {"content": "a", "timestamp": "t1"},
                {"content": "b", "timestamp": "t2"},
            ],
            "_created_at": "2024-06-01T00:00:00+00:00",
        });

        let merged = merge_thread_data(existing, new);
        assert_eq!(merged["messages"].as_array().unwrap().len(), 2);
        // Older creation time wins.
        assert_eq!(merged[meta::CREATED_AT], json!("2024-01-01T00:00:00+00:00"));
    }

    #[tokio::test]
    async fn test_merge_dedupes_disjoint_lists() {
        let existing = json!({
            "messages": [
                {"content": "a", "timestamp": "t1"},
                {"content": "b", "timestamp": "t2"},
            ],
        });
        let new = json!({
            "messages": [{"content": "b", "timestamp": "t2"}],
        });

        let merged = merge_thread_data(existing, new);
        let messages = merged["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["content"], json!("a"));
    }

    #[tokio::test]
    async fn test_merge_idempotent_content() {
        let blob = json!({
            "messages": [{"content": "a", "timestamp": "t1"}],
        });
        let merged = merge_thread_data(blob.clone(), blob.clone());
        assert_eq!(merged["messages"], blob["messages"]);
    }

    #[tokio::test]
    async fn test_delete_chat_all_tiers() {
        let store = Arc::new(MemoryStore::new());
        let m = manager(Some(store.clone()));
        let (chat_id, thread) = m.get_or_create_thread(Some("c1")).await.unwrap();
        {
            let t = thread.lock().await;
            m.save_thread(&chat_id, &t, true).await;
        }

        assert!(m.delete_chat("c1").await);
        assert!(m.sessions.lock().await.is_empty());
        assert!(store.get("c1").await.unwrap().is_none());
        assert!(m.cache.get("chat:c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_chats_sources() {
        let store = Arc::new(MemoryStore::new());
        store.save("cold-1", &empty_thread_data()).await.unwrap();
        let m = manager(Some(store));

        m.get_or_create_thread(Some("active-1")).await.unwrap();
        m.cache
            .set("chat:cached-1", &empty_thread_data(), None)
            .await
            .unwrap();

        let all = m.list_chats("all", 10).await;
        let ids: Vec<&str> = all.iter().map(|c| c.chat_id.as_str()).collect();
        assert!(ids.contains(&"active-1"));
        assert!(ids.contains(&"cached-1"));
        assert!(ids.contains(&"cold-1"));

        let active = all.iter().find(|c| c.chat_id == "active-1").unwrap();
        assert!(active.active);

        let cached = all.iter().find(|c| c.chat_id == "cached-1").unwrap();
        assert_eq!(cached.source.as_deref(), Some("cache"));
        assert!(cached.ttl_remaining.is_some());

        let cold_only = m.list_chats("persistence", 10).await;
        assert!(cold_only.iter().any(|c| c.chat_id == "cold-1"));
        assert!(!cold_only.iter().any(|c| c.chat_id == "cached-1"));
    }

    #[tokio::test]
    async fn test_close_persists_unpersisted_sessions() {
        let store = Arc::new(MemoryStore::new());
        let m = manager(Some(store.clone()));

        let (chat_id, thread) = m.get_or_create_thread(Some("c1")).await.unwrap();
        {
            let mut t = thread.lock().await;
            t.push(Message::user("unsaved"));
            // Cache-only save; not yet persisted.
            m.save_thread(&chat_id, &t, false).await;
        }

        m.close().await;

        let blob = store.get("c1").await.unwrap().unwrap();
        assert_eq!(blob["messages"].as_array().unwrap().len(), 1);
        assert!(m.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_schedule_is_config_error() {
        let mut cfg = config(true);
        cfg.persistence.schedule = "whenever".to_string();
        let store: Arc<dyn ColdStore> = Arc::new(MemoryStore::new());
        let err = ChatHistoryManager::new(cfg, None, Some(store), None).unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_persist_flushes_expiring_chats() {
        let store = Arc::new(MemoryStore::new());
        let mut cfg = config(true);
        cfg.cache.ttl = 400;
        // persist_at = 300: flush when remaining TTL <= 100.
        let m = Arc::new(
            ChatHistoryManager::new(cfg, None, Some(store.clone() as Arc<dyn ColdStore>), None)
                .unwrap(),
        );

        // An entry whose TTL is already below the flush threshold.
        m.cache
            .set(
                "chat:expiring",
                &json!({"messages": [{"role": "user", "content": "save me"}]}),
                Some(Duration::from_secs(50)),
            )
            .await
            .unwrap();

        m.start_background_persist().await;
        // One check interval is min(60, 300/4) = 60s... wait for two ticks.
        tokio::time::sleep(Duration::from_secs(130)).await;
        m.close().await;

        let blob = store.get("expiring").await.unwrap();
        assert!(blob.is_some());
    }
}
