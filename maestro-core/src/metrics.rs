//! Process-local metrics collection
//!
//! Counters for requests, tool calls, errors, cache accesses, and token
//! usage, held under a short lock and emitted as tracing events. Exporters
//! are a deployment concern; this collector only aggregates.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

/// Configuration for metrics collection
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub service_name: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "assistant".to_string(),
        }
    }
}

#[derive(Default)]
struct Counters {
    requests_total: u64,
    requests_failed: u64,
    request_latency_ms_sum: f64,
    tool_calls_total: u64,
    tool_calls_failed: u64,
    tool_latency_ms: HashMap<String, (u64, f64)>,
    errors: HashMap<String, u64>,
    cache_hits: u64,
    cache_misses: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    active_sessions: i64,
}

/// Aggregated metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub avg_request_latency_ms: f64,
    pub tool_calls_total: u64,
    pub tool_calls_failed: u64,
    /// `error_type:source` -> count
    pub errors: HashMap<String, u64>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub active_sessions: i64,
}

/// Collects request, tool, and error metrics
pub struct MetricsCollector {
    enabled: bool,
    counters: Mutex<Counters>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        tracing::info!(
            enabled = config.enabled,
            service = %config.service_name,
            "metrics collector initialized"
        );
        Self {
            enabled: config.enabled,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// A disabled collector: every record call is a no-op
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Record one request outcome
    pub fn record_request(&self, latency_ms: f64, success: bool) {
        if !self.enabled {
            return;
        }
        let mut counters = self.counters.lock();
        counters.requests_total += 1;
        counters.request_latency_ms_sum += latency_ms;
        if !success {
            counters.requests_failed += 1;
        }
        tracing::debug!(latency_ms, success, "request recorded");
    }

    /// Record one tool call outcome
    pub fn record_tool_call(&self, tool_name: &str, latency_ms: f64, success: bool) {
        if !self.enabled {
            return;
        }
        let mut counters = self.counters.lock();
        counters.tool_calls_total += 1;
        if !success {
            counters.tool_calls_failed += 1;
        }
        let entry = counters
            .tool_latency_ms
            .entry(tool_name.to_string())
            .or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += latency_ms;
    }

    /// Record an error by taxonomy tag and source component
    pub fn record_error(&self, error_type: &str, source: &str) {
        if !self.enabled {
            return;
        }
        let key = format!("{}:{}", error_type, source);
        *self.counters.lock().errors.entry(key).or_insert(0) += 1;
    }

    /// Record a cache access
    pub fn record_cache_access(&self, hit: bool) {
        if !self.enabled {
            return;
        }
        let mut counters = self.counters.lock();
        if hit {
            counters.cache_hits += 1;
        } else {
            counters.cache_misses += 1;
        }
    }

    /// Record token usage
    pub fn record_tokens(&self, prompt_tokens: u64, completion_tokens: u64) {
        if !self.enabled {
            return;
        }
        let mut counters = self.counters.lock();
        counters.prompt_tokens += prompt_tokens;
        counters.completion_tokens += completion_tokens;
    }

    /// Record a session opening
    pub fn record_session_start(&self) {
        if !self.enabled {
            return;
        }
        self.counters.lock().active_sessions += 1;
    }

    /// Record a session closing
    pub fn record_session_end(&self) {
        if !self.enabled {
            return;
        }
        let mut counters = self.counters.lock();
        counters.active_sessions = (counters.active_sessions - 1).max(0);
    }

    /// Current aggregate numbers
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock();
        let avg = if counters.requests_total > 0 {
            counters.request_latency_ms_sum / counters.requests_total as f64
        } else {
            0.0
        };
        MetricsSnapshot {
            requests_total: counters.requests_total,
            requests_failed: counters.requests_failed,
            avg_request_latency_ms: avg,
            tool_calls_total: counters.tool_calls_total,
            tool_calls_failed: counters.tool_calls_failed,
            errors: counters.errors.clone(),
            cache_hits: counters.cache_hits,
            cache_misses: counters.cache_misses,
            prompt_tokens: counters.prompt_tokens,
            completion_tokens: counters.completion_tokens,
            active_sessions: counters.active_sessions,
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }
}
