//! Circuit breaker for the ERP tool server
//!
//! Three states: closed (calls pass through), open (calls fail
//! immediately), half-open (a single probe is admitted after the recovery
//! timeout). State transitions are serialized by one mutex; admitted calls
//! execute outside it.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::ErpError;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker guarding calls to a failing dependency
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        let name = name.into();
        tracing::debug!(
            name = %name,
            failure_threshold,
            recovery_timeout_secs = recovery_timeout.as_secs_f64(),
            "circuit breaker initialized"
        );
        Self {
            name,
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Execute an operation under breaker protection
    ///
    /// When open and the recovery timeout has not elapsed, fails
    /// immediately with [`ErpError::CircuitOpen`] carrying the remaining
    /// recovery time. After the timeout, a single call is admitted as the
    /// half-open probe; its success closes the breaker and resets the
    /// counter, its failure reopens it.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, ErpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ErpError>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == BreakerState::Open {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.recovery_timeout {
                    tracing::info!(name = %self.name, "circuit breaker transitioning to half-open");
                    inner.state = BreakerState::HalfOpen;
                } else {
                    let retry_in = (self.recovery_timeout - elapsed).as_secs_f64();
                    return Err(ErpError::CircuitOpen {
                        name: self.name.clone(),
                        retry_in,
                    });
                }
            }
        }

        match op().await {
            Ok(result) => {
                let mut inner = self.inner.lock().await;
                if inner.state == BreakerState::HalfOpen {
                    tracing::info!(name = %self.name, "circuit breaker transitioning to closed");
                }
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                Ok(result)
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                inner.failure_count += 1;
                inner.last_failure = Some(Instant::now());
                let was_half_open = inner.state == BreakerState::HalfOpen;
                if was_half_open || inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::error!(
                        name = %self.name,
                        failures = inner.failure_count,
                        error = %err,
                        "circuit breaker opened"
                    );
                }
                Err(err)
            }
        }
    }

    /// Current state
    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    /// Current consecutive failure count
    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }

    /// Reset to closed with a zero counter
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        tracing::info!(name = %self.name, "circuit breaker reset");
    }
}
