//! Component health checks
//!
//! Registered checks run concurrently under a per-check timeout; a check
//! that times out reports `unhealthy`. Results are cached briefly so
//! orchestration probes cannot stampede the backends. Overall status
//! folds component results: unhealthy beats degraded beats healthy.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use crate::erp::ErpTool;
use crate::memory::cache::HotCache;
use crate::memory::persistence::ColdStore;
use crate::responses::{ComponentHealth, HealthResponse, HealthStatus};

/// Configuration for health checks
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    /// Per-check timeout
    pub timeout: Duration,
    /// How long a result is served from cache
    pub cache_for: Duration,
    pub version: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(5),
            cache_for: Duration::from_secs(10),
            version: "1.0.0".to_string(),
        }
    }
}

/// Boxed async health check returning one component result
pub type HealthCheckFn = Arc<
    dyn Fn() -> Pin<Box<dyn Future<Output = ComponentHealth> + Send>> + Send + Sync,
>;

/// Runs registered component checks and folds an overall status
pub struct HealthChecker {
    config: HealthCheckConfig,
    started_at: Instant,
    checks: Mutex<BTreeMap<String, HealthCheckFn>>,
    cached: Mutex<Option<(Instant, HealthResponse)>>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig) -> Self {
        tracing::info!("health checker initialized");
        Self {
            config,
            started_at: Instant::now(),
            checks: Mutex::new(BTreeMap::new()),
            cached: Mutex::new(None),
        }
    }

    /// Register a component check under a name
    pub fn register_check(&self, name: impl Into<String>, check: HealthCheckFn) {
        let name = name.into();
        tracing::debug!(component = %name, "registered health check");
        self.checks.lock().insert(name, check);
    }

    /// Run all checks (or serve the cached result)
    pub async fn check_all(&self) -> HealthResponse {
        if let Some((at, cached)) = self.cached.lock().as_ref() {
            if at.elapsed() < self.config.cache_for {
                return cached.clone();
            }
        }

        let checks: Vec<(String, HealthCheckFn)> = self
            .checks
            .lock()
            .iter()
            .map(|(name, check)| (name.clone(), check.clone()))
            .collect();

        let timeout = self.config.timeout;
        let futures = checks.into_iter().map(|(name, check)| async move {
            match tokio::time::timeout(timeout, check()).await {
                Ok(result) => result,
                Err(_) => ComponentHealth {
                    name,
                    status: HealthStatus::Unhealthy,
                    latency_ms: Some(timeout.as_secs_f64() * 1000.0),
                    message: Some("health check timed out".to_string()),
                    details: None,
                },
            }
        });
        let components: Vec<ComponentHealth> = futures::future::join_all(futures).await;

        let mut overall = HealthStatus::Healthy;
        for component in &components {
            match component.status {
                HealthStatus::Unhealthy => {
                    overall = HealthStatus::Unhealthy;
                    break;
                }
                HealthStatus::Degraded => overall = HealthStatus::Degraded,
                HealthStatus::Healthy => {}
            }
        }

        let response = HealthResponse {
            status: overall,
            timestamp: Utc::now(),
            version: self.config.version.clone(),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            components,
        };

        *self.cached.lock() = Some((Instant::now(), response.clone()));
        response
    }

    /// Readiness: the service can take requests
    pub async fn readiness(&self) -> bool {
        self.check_all().await.status != HealthStatus::Unhealthy
    }

    /// Liveness: the process is running
    pub fn liveness(&self) -> bool {
        true
    }
}

fn measure(start: Instant) -> Option<f64> {
    Some(start.elapsed().as_secs_f64() * 1000.0)
}

/// Health check over the hot cache: a write/read/delete cycle
pub fn cache_check(cache: Arc<dyn HotCache>) -> HealthCheckFn {
    Arc::new(move || {
        let cache = cache.clone();
        Box::pin(async move {
            let start = Instant::now();
            let probe_key = "health:probe";
            let probe = serde_json::json!({"ping": true});

            let outcome = async {
                cache.set(probe_key, &probe, Some(Duration::from_secs(10))).await?;
                cache.get(probe_key).await?;
                cache.delete(probe_key).await
            }
            .await;

            match outcome {
                Ok(_) => ComponentHealth {
                    name: "cache".to_string(),
                    status: HealthStatus::Healthy,
                    latency_ms: measure(start),
                    message: Some("cache operational".to_string()),
                    details: None,
                },
                Err(err) => ComponentHealth {
                    name: "cache".to_string(),
                    status: HealthStatus::Unhealthy,
                    latency_ms: measure(start),
                    message: Some(format!("cache error: {}", err)),
                    details: None,
                },
            }
        })
    })
}

/// Health check over the cold store: a bounded listing
pub fn store_check(store: Arc<dyn ColdStore>) -> HealthCheckFn {
    Arc::new(move || {
        let store = store.clone();
        Box::pin(async move {
            let start = Instant::now();
            match store.list(1).await {
                Ok(_) => ComponentHealth {
                    name: "persistence".to_string(),
                    status: HealthStatus::Healthy,
                    latency_ms: measure(start),
                    message: Some("object store operational".to_string()),
                    details: None,
                },
                Err(err) => ComponentHealth {
                    name: "persistence".to_string(),
                    status: HealthStatus::Unhealthy,
                    latency_ms: measure(start),
                    message: Some(format!("object store error: {}", err)),
                    details: None,
                },
            }
        })
    })
}

/// Health check over the ERP adapter: connected is healthy, configured
/// but disconnected is degraded
pub fn erp_check(erp: Arc<ErpTool>) -> HealthCheckFn {
    Arc::new(move || {
        let erp = erp.clone();
        Box::pin(async move {
            let start = Instant::now();
            let connected = erp.is_connected().await;
            let breaker_state = erp.breaker().state().await;
            let details = serde_json::json!({
                "endpoint": erp.endpoint(),
                "circuit_state": breaker_state.to_string(),
            });

            ComponentHealth {
                name: erp.name().to_string(),
                status: if connected {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded
                },
                latency_ms: measure(start),
                message: Some(if connected {
                    "connected".to_string()
                } else {
                    "configured but not connected".to_string()
                }),
                details: Some(details),
            }
        })
    })
}
