//! Request rate limiting
//!
//! Sliding-window rate limiter protecting the request path: per-identity
//! (or global) request counts, token budgets, and concurrent-request caps.
//! Rejection is an explicit return value, not a failure; the limiter itself
//! never errors and never blocks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Configuration for rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Request limits
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    /// Token budget per minute
    pub tokens_per_minute: u64,
    /// Concurrent request cap
    pub max_concurrent_requests: u32,
    /// If false, all identities share one global window
    pub per_user: bool,
    /// Factor by which the admission ceiling exceeds the nominal limit
    pub burst_multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            requests_per_hour: 1_000,
            tokens_per_minute: 100_000,
            max_concurrent_requests: 10,
            per_user: true,
            burst_multiplier: 1.5,
        }
    }
}

/// Which limit a rejection tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Concurrent,
    RequestsPerMinute,
    RequestsPerHour,
    TokensPerMinute,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Concurrent => write!(f, "concurrent"),
            LimitKind::RequestsPerMinute => write!(f, "requests_per_minute"),
            LimitKind::RequestsPerHour => write!(f, "requests_per_hour"),
            LimitKind::TokensPerMinute => write!(f, "tokens_per_minute"),
        }
    }
}

/// An admission rejection
///
/// Carries the limit that tripped and how long the caller should wait
/// before retrying. This is a value, not a fault: the orchestrator turns
/// it into a `success=false` response envelope.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Rate limit exceeded: {message}")]
pub struct RateLimitExceeded {
    pub kind: LimitKind,
    /// Seconds until the window turns over
    pub retry_after: Option<f64>,
    pub message: String,
}

/// State for a single rate limit window
#[derive(Debug)]
struct WindowState {
    count: u32,
    tokens: u64,
    window_start: Instant,
}

impl WindowState {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            tokens: 0,
            window_start: now,
        }
    }

    /// Reset the window if its length has fully elapsed
    fn roll(&mut self, now: Instant, length: Duration) {
        if now.duration_since(self.window_start) >= length {
            self.count = 0;
            self.tokens = 0;
            self.window_start = now;
        }
    }

    fn remaining(&self, now: Instant, length: Duration) -> f64 {
        length
            .saturating_sub(now.duration_since(self.window_start))
            .as_secs_f64()
    }
}

#[derive(Default)]
struct LimiterState {
    user_minute: HashMap<String, WindowState>,
    user_hour: HashMap<String, WindowState>,
    global_minute: Option<WindowState>,
    global_hour: Option<WindowState>,
    concurrent: HashMap<String, u32>,
    global_concurrent: u32,
}

/// Usage numbers for one window
#[derive(Debug, Clone, Serialize)]
pub struct WindowUsage {
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
}

impl WindowUsage {
    fn new(used: u64, limit: u64) -> Self {
        Self {
            used,
            limit,
            remaining: limit.saturating_sub(used),
        }
    }
}

/// Snapshot of current usage for an identity
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    pub requests_minute: WindowUsage,
    pub requests_hour: WindowUsage,
    pub tokens_minute: WindowUsage,
    pub concurrent_used: u32,
    pub concurrent_limit: u32,
}

/// Sliding window rate limiter
///
/// All state lives behind one mutex; every operation is a short critical
/// section with no I/O and no waiting.
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a rate limiter from configuration
    pub fn new(config: RateLimitConfig) -> Self {
        tracing::info!(
            enabled = config.enabled,
            requests_per_minute = config.requests_per_minute,
            tokens_per_minute = config.tokens_per_minute,
            "rate limiter initialized"
        );
        Self {
            config,
            state: Mutex::new(LimiterState::default()),
        }
    }

    fn identity(&self, user_id: Option<&str>) -> String {
        if self.config.per_user {
            user_id.unwrap_or("global").to_string()
        } else {
            "global".to_string()
        }
    }

    /// Check whether a request may be admitted
    ///
    /// Checks the concurrency cap, then the per-minute and per-hour request
    /// windows, then the token budget. The admit ceiling for the minute
    /// windows is `limit * burst_multiplier`; the hour window uses the
    /// nominal limit. Rejection carries the remaining window life as
    /// `retry_after`.
    pub fn check_limit(
        &self,
        user_id: Option<&str>,
        estimated_tokens: u64,
    ) -> Result<(), RateLimitExceeded> {
        if !self.config.enabled {
            return Ok(());
        }

        let identity = self.identity(user_id);
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        Self::cleanup(state, now);

        // Concurrency cap.
        let current = if self.config.per_user {
            state.concurrent.get(&identity).copied().unwrap_or(0)
        } else {
            state.global_concurrent
        };
        if current >= self.config.max_concurrent_requests {
            tracing::warn!(
                identity = %identity,
                current,
                limit = self.config.max_concurrent_requests,
                "concurrent request limit exceeded"
            );
            return Err(RateLimitExceeded {
                kind: LimitKind::Concurrent,
                retry_after: Some(1.0),
                message: format!(
                    "too many concurrent requests: {}/{}",
                    current, self.config.max_concurrent_requests
                ),
            });
        }

        // Per-minute request window, with burst allowance.
        let per_user = self.config.per_user;
        let minute = Self::window(
            &mut state.user_minute,
            &mut state.global_minute,
            per_user,
            &identity,
            now,
        );
        minute.roll(now, MINUTE);
        let minute_ceiling =
            (self.config.requests_per_minute as f64 * self.config.burst_multiplier) as u32;
        if minute.count >= minute_ceiling {
            let retry_after = minute.remaining(now, MINUTE);
            tracing::warn!(
                identity = %identity,
                count = minute.count,
                limit = self.config.requests_per_minute,
                "request rate limit exceeded (per minute)"
            );
            return Err(RateLimitExceeded {
                kind: LimitKind::RequestsPerMinute,
                retry_after: Some(retry_after),
                message: format!(
                    "{}/{} requests per minute",
                    minute.count, self.config.requests_per_minute
                ),
            });
        }

        // Token budget shares the minute window.
        if estimated_tokens > 0 {
            let token_ceiling =
                (self.config.tokens_per_minute as f64 * self.config.burst_multiplier) as u64;
            if minute.tokens + estimated_tokens > token_ceiling {
                let retry_after = minute.remaining(now, MINUTE);
                tracing::warn!(
                    identity = %identity,
                    current_tokens = minute.tokens,
                    requested = estimated_tokens,
                    limit = self.config.tokens_per_minute,
                    "token rate limit exceeded"
                );
                return Err(RateLimitExceeded {
                    kind: LimitKind::TokensPerMinute,
                    retry_after: Some(retry_after),
                    message: format!(
                        "{}/{} tokens per minute",
                        minute.tokens + estimated_tokens,
                        self.config.tokens_per_minute
                    ),
                });
            }
        }

        // Per-hour request window.
        let hour = Self::window(
            &mut state.user_hour,
            &mut state.global_hour,
            per_user,
            &identity,
            now,
        );
        hour.roll(now, HOUR);
        if hour.count >= self.config.requests_per_hour {
            let retry_after = hour.remaining(now, HOUR);
            tracing::warn!(
                identity = %identity,
                count = hour.count,
                limit = self.config.requests_per_hour,
                "request rate limit exceeded (per hour)"
            );
            return Err(RateLimitExceeded {
                kind: LimitKind::RequestsPerHour,
                retry_after: Some(retry_after),
                message: format!(
                    "{}/{} requests per hour",
                    hour.count, self.config.requests_per_hour
                ),
            });
        }

        Ok(())
    }

    /// Record a completed request against the windows
    pub fn record_request(&self, user_id: Option<&str>, tokens_used: u64) {
        if !self.config.enabled {
            return;
        }

        let identity = self.identity(user_id);
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let per_user = self.config.per_user;

        let minute = Self::window(
            &mut state.user_minute,
            &mut state.global_minute,
            per_user,
            &identity,
            now,
        );
        minute.roll(now, MINUTE);
        minute.count += 1;
        minute.tokens += tokens_used;

        let hour = Self::window(
            &mut state.user_hour,
            &mut state.global_hour,
            per_user,
            &identity,
            now,
        );
        hour.roll(now, HOUR);
        hour.count += 1;
        hour.tokens += tokens_used;

        tracing::debug!(
            identity = %identity,
            tokens = tokens_used,
            minute_count = minute_count_after(state, per_user, &identity),
            "recorded request"
        );
    }

    /// Acquire a concurrent request slot (non-blocking)
    pub fn acquire_concurrent_slot(&self, user_id: Option<&str>) {
        if !self.config.enabled {
            return;
        }
        let identity = self.identity(user_id);
        let mut state = self.state.lock();
        if self.config.per_user {
            *state.concurrent.entry(identity).or_insert(0) += 1;
        } else {
            state.global_concurrent += 1;
        }
    }

    /// Release a concurrent request slot (non-blocking, floors at zero)
    pub fn release_concurrent_slot(&self, user_id: Option<&str>) {
        if !self.config.enabled {
            return;
        }
        let identity = self.identity(user_id);
        let mut state = self.state.lock();
        if self.config.per_user {
            if let Some(count) = state.concurrent.get_mut(&identity) {
                *count = count.saturating_sub(1);
            }
        } else {
            state.global_concurrent = state.global_concurrent.saturating_sub(1);
        }
    }

    /// Current usage for an identity, reported against the nominal limits
    pub fn usage(&self, user_id: Option<&str>) -> UsageSnapshot {
        let identity = self.identity(user_id);
        let state = self.state.lock();

        let (minute_count, minute_tokens) = if self.config.per_user {
            state
                .user_minute
                .get(&identity)
                .map(|w| (w.count, w.tokens))
                .unwrap_or((0, 0))
        } else {
            state
                .global_minute
                .as_ref()
                .map(|w| (w.count, w.tokens))
                .unwrap_or((0, 0))
        };
        let hour_count = if self.config.per_user {
            state.user_hour.get(&identity).map(|w| w.count).unwrap_or(0)
        } else {
            state.global_hour.as_ref().map(|w| w.count).unwrap_or(0)
        };
        let concurrent = if self.config.per_user {
            state.concurrent.get(&identity).copied().unwrap_or(0)
        } else {
            state.global_concurrent
        };

        UsageSnapshot {
            requests_minute: WindowUsage::new(
                minute_count as u64,
                self.config.requests_per_minute as u64,
            ),
            requests_hour: WindowUsage::new(
                hour_count as u64,
                self.config.requests_per_hour as u64,
            ),
            tokens_minute: WindowUsage::new(minute_tokens, self.config.tokens_per_minute),
            concurrent_used: concurrent,
            concurrent_limit: self.config.max_concurrent_requests,
        }
    }

    /// Reset limits for one identity, or everything
    pub fn reset(&self, user_id: Option<&str>) {
        let mut state = self.state.lock();
        match user_id {
            Some(id) => {
                state.user_minute.remove(id);
                state.user_hour.remove(id);
                state.concurrent.remove(id);
            }
            None => {
                *state = LimiterState::default();
            }
        }
        tracing::info!(user_id = user_id.unwrap_or("all"), "rate limits reset");
    }

    fn window<'a>(
        per_user_map: &'a mut HashMap<String, WindowState>,
        global: &'a mut Option<WindowState>,
        per_user: bool,
        identity: &str,
        now: Instant,
    ) -> &'a mut WindowState {
        if per_user {
            per_user_map
                .entry(identity.to_string())
                .or_insert_with(|| WindowState::new(now))
        } else {
            global.get_or_insert_with(|| WindowState::new(now))
        }
    }

    /// Drop windows older than twice their length and idle concurrency
    /// counters
    fn cleanup(state: &mut LimiterState, now: Instant) {
        state
            .user_minute
            .retain(|_, w| now.duration_since(w.window_start) <= MINUTE * 2);
        state
            .user_hour
            .retain(|_, w| now.duration_since(w.window_start) <= HOUR * 2);
        state.concurrent.retain(|_, count| *count > 0);
    }
}

fn minute_count_after(state: &LimiterState, per_user: bool, identity: &str) -> u32 {
    if per_user {
        state.user_minute.get(identity).map(|w| w.count).unwrap_or(0)
    } else {
        state.global_minute.as_ref().map(|w| w.count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(config: RateLimitConfig) -> RateLimiter {
        RateLimiter::new(config)
    }

    #[test]
    fn test_disabled_limiter_admits_everything() {
        let limiter = limiter(RateLimitConfig {
            enabled: false,
            requests_per_minute: 0,
            ..Default::default()
        });
        for _ in 0..100 {
            assert!(limiter.check_limit(Some("u"), 1_000_000).is_ok());
            limiter.record_request(Some("u"), 1_000_000);
        }
    }

    #[test]
    fn test_minute_limit_rejects_with_retry_after() {
        let limiter = limiter(RateLimitConfig {
            requests_per_minute: 2,
            burst_multiplier: 1.0,
            ..Default::default()
        });

        assert!(limiter.check_limit(Some("alice"), 0).is_ok());
        limiter.record_request(Some("alice"), 0);
        assert!(limiter.check_limit(Some("alice"), 0).is_ok());
        limiter.record_request(Some("alice"), 0);

        let err = limiter.check_limit(Some("alice"), 0).unwrap_err();
        assert_eq!(err.kind, LimitKind::RequestsPerMinute);
        let retry_after = err.retry_after.unwrap();
        assert!(retry_after > 58.0 && retry_after <= 60.0);
    }

    #[test]
    fn test_burst_multiplier_raises_admit_ceiling() {
        let limiter = limiter(RateLimitConfig {
            requests_per_minute: 2,
            burst_multiplier: 2.0,
            ..Default::default()
        });

        for _ in 0..3 {
            assert!(limiter.check_limit(Some("u"), 0).is_ok());
            limiter.record_request(Some("u"), 0);
        }
        // Fourth hits the burst ceiling of 4.
        assert!(limiter.check_limit(Some("u"), 0).is_ok());
        limiter.record_request(Some("u"), 0);
        assert!(limiter.check_limit(Some("u"), 0).is_err());
    }

    #[test]
    fn test_identities_limited_independently() {
        let limiter = limiter(RateLimitConfig {
            requests_per_minute: 1,
            burst_multiplier: 1.0,
            ..Default::default()
        });

        limiter.record_request(Some("alice"), 0);
        assert!(limiter.check_limit(Some("alice"), 0).is_err());
        assert!(limiter.check_limit(Some("bob"), 0).is_ok());
    }

    #[test]
    fn test_global_mode_shares_one_window() {
        let limiter = limiter(RateLimitConfig {
            requests_per_minute: 1,
            burst_multiplier: 1.0,
            per_user: false,
            ..Default::default()
        });

        limiter.record_request(Some("alice"), 0);
        assert!(limiter.check_limit(Some("bob"), 0).is_err());
    }

    #[test]
    fn test_token_limit() {
        let limiter = limiter(RateLimitConfig {
            tokens_per_minute: 100,
            burst_multiplier: 1.0,
            ..Default::default()
        });

        limiter.record_request(Some("u"), 90);
        assert!(limiter.check_limit(Some("u"), 5).is_ok());
        let err = limiter.check_limit(Some("u"), 20).unwrap_err();
        assert_eq!(err.kind, LimitKind::TokensPerMinute);
    }

    #[test]
    fn test_concurrent_slots() {
        let limiter = limiter(RateLimitConfig {
            max_concurrent_requests: 2,
            ..Default::default()
        });

        limiter.acquire_concurrent_slot(Some("u"));
        limiter.acquire_concurrent_slot(Some("u"));
        let err = limiter.check_limit(Some("u"), 0).unwrap_err();
        assert_eq!(err.kind, LimitKind::Concurrent);

        limiter.release_concurrent_slot(Some("u"));
        assert!(limiter.check_limit(Some("u"), 0).is_ok());
    }

    #[test]
    fn test_release_floors_at_zero() {
        let limiter = limiter(RateLimitConfig::default());
        limiter.release_concurrent_slot(Some("u"));
        limiter.release_concurrent_slot(Some("u"));
        assert_eq!(limiter.usage(Some("u")).concurrent_used, 0);
    }

    #[test]
    fn test_window_resets_after_length() {
        let limiter = limiter(RateLimitConfig {
            requests_per_minute: 1,
            burst_multiplier: 1.0,
            ..Default::default()
        });
        limiter.record_request(Some("u"), 0);
        assert!(limiter.check_limit(Some("u"), 0).is_err());

        // Rewind the window past its length; the next check resets it and
        // the first admitted request of the new window sees count=1.
        {
            let mut state = limiter.state.lock();
            let window = state.user_minute.get_mut("u").unwrap();
            window.window_start -= Duration::from_secs(60);
        }
        assert!(limiter.check_limit(Some("u"), 0).is_ok());
        limiter.record_request(Some("u"), 0);
        assert_eq!(limiter.usage(Some("u")).requests_minute.used, 1);
    }

    #[test]
    fn test_stale_windows_collected() {
        let limiter = limiter(RateLimitConfig::default());
        limiter.record_request(Some("ghost"), 0);
        {
            let mut state = limiter.state.lock();
            let window = state.user_minute.get_mut("ghost").unwrap();
            window.window_start -= Duration::from_secs(121);
        }
        // Any admission check runs garbage collection.
        limiter.check_limit(Some("other"), 0).unwrap();
        assert!(!limiter.state.lock().user_minute.contains_key("ghost"));
    }

    #[test]
    fn test_usage_snapshot_counts() {
        let limiter = limiter(RateLimitConfig {
            requests_per_minute: 10,
            ..Default::default()
        });
        limiter.record_request(Some("u"), 40);
        limiter.record_request(Some("u"), 2);
        let usage = limiter.usage(Some("u"));
        assert_eq!(usage.requests_minute.used, 2);
        assert_eq!(usage.requests_minute.remaining, 8);
        assert_eq!(usage.tokens_minute.used, 42);
    }

    #[test]
    fn test_post_request_counter_increments() {
        let limiter = limiter(RateLimitConfig::default());
        let before = limiter.usage(Some("u"));
        limiter.check_limit(Some("u"), 10).unwrap();
        limiter.record_request(Some("u"), 10);
        let after = limiter.usage(Some("u"));
        assert_eq!(after.requests_minute.used, before.requests_minute.used + 1);
        assert_eq!(after.tokens_minute.used, before.tokens_minute.used + 10);
    }

    #[test]
    fn test_reset_single_identity() {
        let limiter = limiter(RateLimitConfig::default());
        limiter.record_request(Some("a"), 5);
        limiter.record_request(Some("b"), 5);
        limiter.reset(Some("a"));
        assert_eq!(limiter.usage(Some("a")).requests_minute.used, 0);
        assert_eq!(limiter.usage(Some("b")).requests_minute.used, 1);
    }
}
