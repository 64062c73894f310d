//! Stateful MCP session management
//!
//! Maintains per-(chat, server) context for external tool servers that
//! keep state across invocations (open forms, partial transactions).
//! Sessions live in three tiers: process memory, the hot cache, and the
//! cold store; resolution walks the tiers in that order and warms the
//! cache on a cold-store hit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::memory::cache::HotCache;
use crate::memory::persistence::ColdStore;

/// Configuration for MCP session management
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSessionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Session TTL in seconds
    #[serde(default = "default_session_ttl")]
    pub session_ttl: u64,
    /// Persist sessions to the cold store
    #[serde(default = "default_persist")]
    pub persist_sessions: bool,
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
}

fn default_session_ttl() -> u64 {
    3600
}

fn default_persist() -> bool {
    true
}

fn default_cache_prefix() -> String {
    "mcp_session:".to_string()
}

impl Default for McpSessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            session_ttl: default_session_ttl(),
            persist_sessions: default_persist(),
            cache_prefix: default_cache_prefix(),
        }
    }
}

/// State of one MCP session
///
/// At most one exists per `(chat_id, mcp_server_name)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpSessionState {
    pub session_id: String,
    /// Links to the chat history session
    pub chat_id: String,
    pub mcp_server_name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Form state keyed by form name, plus `_active_form` and
    /// `_last_update` markers
    #[serde(default)]
    pub form_context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl McpSessionState {
    fn new(chat_id: &str, mcp_server_name: &str, user_id: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            mcp_server_name: mcp_server_name.to_string(),
            user_id: user_id.map(str::to_string),
            form_context: Map::new(),
            created_at: now,
            last_accessed: now,
            metadata: Map::new(),
        }
    }
}

/// Manages stateful MCP sessions across memory, cache, and persistence
pub struct McpSessionManager {
    cache: Option<Arc<dyn HotCache>>,
    persistence: Option<Arc<dyn ColdStore>>,
    config: McpSessionConfig,
    /// Session map; the lock also serializes updates for the same
    /// `(chat_id, server)` pair
    sessions: Mutex<HashMap<String, McpSessionState>>,
}

impl McpSessionManager {
    pub fn new(
        cache: Option<Arc<dyn HotCache>>,
        persistence: Option<Arc<dyn ColdStore>>,
        config: McpSessionConfig,
    ) -> Self {
        tracing::info!(
            enabled = config.enabled,
            persist = config.persist_sessions,
            "MCP session manager initialized"
        );
        Self {
            cache,
            persistence,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(&self, chat_id: &str, mcp_server_name: &str) -> String {
        format!("{}{}:{}", self.config.cache_prefix, chat_id, mcp_server_name)
    }

    /// Get an existing session or create a new one
    ///
    /// Lookup order: process memory, hot cache, cold store (with cache
    /// warm-up), then creation. Tier failures are logged and fall through.
    pub async fn get_or_create(
        &self,
        chat_id: &str,
        mcp_server_name: &str,
        user_id: Option<&str>,
    ) -> McpSessionState {
        let cache_key = self.cache_key(chat_id, mcp_server_name);
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get_mut(&cache_key) {
            session.last_accessed = Utc::now();
            tracing::debug!(session_id = %session.session_id, "found session in memory");
            return session.clone();
        }

        if let Some(cache) = &self.cache {
            match cache.get(&cache_key).await {
                Ok(Some(cached)) => {
                    if let Ok(mut session) = serde_json::from_value::<McpSessionState>(cached) {
                        session.last_accessed = Utc::now();
                        tracing::debug!(session_id = %session.session_id, "found session in cache");
                        sessions.insert(cache_key, session.clone());
                        return session;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "session cache lookup failed");
                }
            }
        }

        if self.config.persist_sessions {
            if let Some(persistence) = &self.persistence {
                match persistence.get(&cache_key).await {
                    Ok(Some(persisted)) => {
                        if let Ok(mut session) =
                            serde_json::from_value::<McpSessionState>(persisted)
                        {
                            session.last_accessed = Utc::now();
                            tracing::debug!(
                                session_id = %session.session_id,
                                "found session in persistence"
                            );
                            sessions.insert(cache_key.clone(), session.clone());
                            self.write_cache(&cache_key, &session).await;
                            return session;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "session persistence lookup failed");
                    }
                }
            }
        }

        let session = McpSessionState::new(chat_id, mcp_server_name, user_id);
        tracing::info!(
            session_id = %session.session_id,
            chat_id,
            mcp_server = mcp_server_name,
            "created new MCP session"
        );
        sessions.insert(cache_key.clone(), session.clone());
        drop(sessions);

        self.write_cache(&cache_key, &session).await;
        if self.config.persist_sessions {
            self.write_persistence(&cache_key, &session).await;
        }

        session
    }

    /// Find a session by its session ID
    pub async fn get_session(&self, session_id: &str) -> Option<McpSessionState> {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    /// Save a session to memory and cache, optionally to the cold store
    pub async fn save_session(&self, mut session: McpSessionState, persist: bool) {
        let cache_key = self.cache_key(&session.chat_id, &session.mcp_server_name);
        session.last_accessed = Utc::now();

        self.sessions
            .lock()
            .await
            .insert(cache_key.clone(), session.clone());
        self.write_cache(&cache_key, &session).await;
        if persist {
            self.write_persistence(&cache_key, &session).await;
        }
    }

    /// Update a form's context within a session
    ///
    /// Deep-merges `field_data` into the named form, stamps
    /// `_active_form` and `_last_update`, and writes through. Returns false
    /// when the session is unknown.
    pub async fn update_form_context(
        &self,
        session_id: &str,
        form_name: &str,
        field_data: Map<String, Value>,
    ) -> bool {
        let updated = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.values_mut().find(|s| s.session_id == session_id) else {
                tracing::warn!(session_id, "session not found for form context update");
                return false;
            };

            let form = session
                .form_context
                .entry(form_name.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            deep_merge(form, Value::Object(field_data));

            session.form_context.insert(
                "_active_form".to_string(),
                Value::String(form_name.to_string()),
            );
            session.form_context.insert(
                "_last_update".to_string(),
                Value::String(Utc::now().to_rfc3339()),
            );
            session.clone()
        };

        tracing::debug!(session_id, form_name, "updated form context");
        self.save_session(updated, self.config.persist_sessions).await;
        true
    }

    /// Clear one form's context, or all of it
    pub async fn clear_form_context(&self, session_id: &str, form_name: Option<&str>) -> bool {
        let updated = {
            let mut sessions = self.sessions.lock().await;
            let Some(session) = sessions.values_mut().find(|s| s.session_id == session_id) else {
                return false;
            };

            match form_name {
                Some(name) => {
                    session.form_context.remove(name);
                    let active = session
                        .form_context
                        .get("_active_form")
                        .and_then(Value::as_str);
                    if active == Some(name) {
                        session.form_context.remove("_active_form");
                    }
                }
                None => {
                    session.form_context = Map::new();
                }
            }
            session.clone()
        };

        self.save_session(updated, self.config.persist_sessions).await;
        true
    }

    /// Build the argument map injected into stateful tool calls
    pub fn build_kwargs(&self, session: &McpSessionState) -> Map<String, Value> {
        let mut kwargs = Map::new();
        kwargs.insert(
            "session_id".to_string(),
            Value::String(session.session_id.clone()),
        );
        if let Some(user_id) = &session.user_id {
            kwargs.insert("user_id".to_string(), Value::String(user_id.clone()));
        }
        kwargs.insert(
            "form_context".to_string(),
            Value::Object(session.form_context.clone()),
        );
        kwargs.insert("chat_id".to_string(), Value::String(session.chat_id.clone()));
        kwargs
    }

    /// Delete a session from all tiers
    pub async fn delete_session(&self, chat_id: &str, mcp_server_name: &str) -> bool {
        let cache_key = self.cache_key(chat_id, mcp_server_name);
        self.sessions.lock().await.remove(&cache_key);

        if let Some(cache) = &self.cache {
            if let Err(err) = cache.delete(&cache_key).await {
                tracing::warn!(error = %err, "failed to delete session from cache");
            }
        }
        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.delete(&cache_key).await {
                tracing::warn!(error = %err, "failed to delete session from persistence");
            }
        }

        tracing::info!(chat_id, mcp_server = mcp_server_name, "deleted MCP session");
        true
    }

    /// List in-memory sessions, optionally filtered by chat
    pub async fn list_sessions(&self, chat_id: Option<&str>) -> Vec<McpSessionState> {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .filter(|s| chat_id.map(|id| s.chat_id == id).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Persist every in-memory session and clear the map
    ///
    /// Per-session failures are isolated: one bad write does not stop the
    /// rest.
    pub async fn close(&self) {
        let sessions: Vec<McpSessionState> = {
            let mut map = self.sessions.lock().await;
            let drained = map.values().cloned().collect();
            map.clear();
            drained
        };

        if self.config.persist_sessions && self.persistence.is_some() {
            for session in &sessions {
                let cache_key = self.cache_key(&session.chat_id, &session.mcp_server_name);
                self.write_persistence(&cache_key, session).await;
            }
        }

        tracing::info!("MCP session manager closed");
    }

    async fn write_cache(&self, cache_key: &str, session: &McpSessionState) {
        let Some(cache) = &self.cache else { return };
        match serde_json::to_value(session) {
            Ok(value) => {
                let ttl = Duration::from_secs(self.config.session_ttl);
                if let Err(err) = cache.set(cache_key, &value, Some(ttl)).await {
                    tracing::warn!(error = %err, "failed to cache session");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize session"),
        }
    }

    async fn write_persistence(&self, cache_key: &str, session: &McpSessionState) {
        let Some(persistence) = &self.persistence else {
            return;
        };
        match serde_json::to_value(session) {
            Ok(value) => {
                if let Err(err) = persistence.save(cache_key, &value).await {
                    tracing::warn!(
                        session_id = %session.session_id,
                        error = %err,
                        "failed to persist session"
                    );
                } else {
                    tracing::debug!(session_id = %session.session_id, "persisted session");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to serialize session"),
        }
    }
}

/// Recursively merge `incoming` into `target`
///
/// Objects merge key-wise; any other value type replaces the target.
fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target_map), Value::Object(incoming_map)) => {
            for (key, value) in incoming_map {
                match target_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (target, incoming) => *target = incoming,
    }
}
