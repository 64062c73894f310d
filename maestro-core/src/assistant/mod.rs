//! The assistant: end-to-end request orchestration
//!
//! Wires every subsystem together and exposes the entry points:
//! [`Assistant::process_question`], [`Assistant::process_question_stream`],
//! [`Assistant::run_workflow`], chat listing/deletion, health, and
//! shutdown. Build one with [`Assistant::builder`].

mod run;
mod streaming;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::config::{AssistantConfig, McpServerEntry};
use crate::erp::{register_erp_tools, ErpTokenProvider, ErpTool, ErpToolConfig, TokenCredential};
use crate::error::{Error, Result};
use crate::health::{cache_check, erp_check, store_check, HealthChecker, HealthCheckConfig};
use crate::mcp::McpSessionManager;
use crate::memory::{ChatHistoryManager, ColdStore, HotCache, InMemoryCache, MemoryConfig};
use crate::metrics::{MetricsCollector, MetricsConfig};
use crate::model::{ChatModel, ModelFactory, ModelRegistry};
use crate::responses::HealthResponse;
use crate::security::{InputValidator, RateLimiter};
use crate::tool::{
    SecurityMiddleware, Tool, ToolDescriptor, ToolDispatcher, ToolMiddleware, ToolRegistry,
    ToolService, TracingMiddleware,
};
use crate::workflow::WorkflowManager;

/// The orchestration runtime
pub struct Assistant {
    pub(super) config: AssistantConfig,
    pub(super) registry: ModelRegistry,
    pub(super) factory: ModelFactory,
    pub(super) system_prompt: Option<String>,
    pub(super) agent: Arc<Agent>,
    pub(super) dispatcher: Arc<ToolDispatcher>,
    pub(super) history: Arc<ChatHistoryManager>,
    pub(super) mcp_sessions: Option<Arc<McpSessionManager>>,
    pub(super) erp_tools: Vec<Arc<ErpTool>>,
    pub(super) workflows: Arc<WorkflowManager>,
    pub(super) limiter: Arc<RateLimiter>,
    pub(super) validator: Arc<InputValidator>,
    pub(super) metrics: Arc<MetricsCollector>,
    pub(super) health: HealthChecker,
}

impl Assistant {
    /// Start building an assistant
    pub fn builder() -> AssistantBuilder {
        AssistantBuilder::default()
    }

    /// The configuration this assistant was built from
    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Names of registered model providers
    pub fn list_models(&self) -> Vec<String> {
        self.registry.list_providers()
    }

    /// Names of loaded workflows
    pub fn list_workflows(&self) -> Vec<String> {
        self.workflows.workflow_names()
    }

    /// Structural summary of a loaded workflow
    pub fn workflow_info(&self, name: &str) -> Option<crate::workflow::WorkflowInfo> {
        self.workflows.workflow_info(name)
    }

    /// Rate-limit usage for an identity
    pub fn usage(&self, user_id: Option<&str>) -> crate::security::UsageSnapshot {
        self.limiter.usage(user_id)
    }

    /// Current metrics
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run all component health checks
    pub async fn health_check(&self) -> HealthResponse {
        self.health.check_all().await
    }

    /// Readiness probe
    pub async fn readiness(&self) -> bool {
        self.health.readiness().await
    }

    /// Liveness probe
    pub fn liveness(&self) -> bool {
        self.health.liveness()
    }

    /// List known chats from the requested tiers
    pub async fn list_chats(
        &self,
        source: &str,
        limit: usize,
    ) -> Vec<crate::responses::ChatListItem> {
        self.history.list_chats(source, limit).await
    }

    /// Delete a chat from all storage layers
    pub async fn delete_chat(&self, chat_id: &str) -> bool {
        self.history.delete_chat(chat_id).await
    }

    /// Shut down: drain conversation memory, close sessions and adapters
    pub async fn close(&self) {
        self.history.close().await;
        if let Some(sessions) = &self.mcp_sessions {
            sessions.close().await;
        }
        for erp in &self.erp_tools {
            erp.close().await;
        }
        tracing::info!("assistant closed");
    }
}

enum ToolRegistration {
    Dyn(Arc<dyn crate::tool::DynTool>),
    Service(ToolDescriptor, Arc<dyn ToolService>),
}

/// Builder for [`Assistant`]
///
/// External capabilities (model backends, cache, object store, ERP
/// credentials) are injected here; everything else is derived from
/// [`AssistantConfig`].
#[derive(Default)]
pub struct AssistantBuilder {
    config: AssistantConfig,
    system_prompt: Option<String>,
    model: Option<Arc<dyn ChatModel>>,
    factory: ModelFactory,
    cache: Option<Arc<dyn HotCache>>,
    persistence: Option<Arc<dyn ColdStore>>,
    erp_credentials: HashMap<String, Arc<dyn TokenCredential>>,
    tools: Vec<ToolRegistration>,
    extra_middleware: Vec<Arc<dyn ToolMiddleware>>,
}

impl AssistantBuilder {
    /// Use the given configuration
    pub fn config(mut self, config: AssistantConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the system prompt
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Use an explicit default chat model instead of resolving one from
    /// the registry
    pub fn model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Provide the constructor map for model providers
    pub fn model_factory(mut self, factory: ModelFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Use an external hot cache backend
    pub fn cache(mut self, cache: Arc<dyn HotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Use an external cold store backend
    pub fn persistence(mut self, store: Arc<dyn ColdStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// Provide the OAuth credential for a configured ERP server
    pub fn erp_credential(
        mut self,
        server_name: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        self.erp_credentials.insert(server_name.into(), credential);
        self
    }

    /// Register a typed tool (decorator source)
    pub fn register_tool<T: Tool + 'static>(mut self, tool: T) -> Self {
        self.tools.push(ToolRegistration::Dyn(crate::tool::box_tool(tool)));
        self
    }

    /// Register a config-declared tool bound to a service
    pub fn register_service(
        mut self,
        descriptor: ToolDescriptor,
        service: Arc<dyn ToolService>,
    ) -> Self {
        self.tools.push(ToolRegistration::Service(descriptor, service));
        self
    }

    /// Append an extra middleware to the tool call chain
    pub fn middleware(mut self, middleware: Arc<dyn ToolMiddleware>) -> Self {
        self.extra_middleware.push(middleware);
        self
    }

    /// Build and initialize the assistant
    ///
    /// Connects configured ERP servers (best effort: a connection failure
    /// is logged, their tools stay unregistered) and starts the
    /// background persist task when persistence is enabled.
    pub async fn build(self) -> Result<Assistant> {
        let config = self.config;

        // Model registry and default client.
        let mut registry = ModelRegistry::new();
        registry.load(config.models.clone(), config.default_model.as_deref());

        let default_model: Arc<dyn ChatModel> = match self.model {
            Some(model) => model,
            None => {
                let provider = registry.get_default()?;
                self.factory.create_client(provider)?
            }
        };

        // Security and observability.
        let validator = Arc::new(InputValidator::new(config.security.validation()));
        let limiter = Arc::new(RateLimiter::new(config.security.rate_limit()));
        let metrics = Arc::new(if config.observability.metrics_enabled {
            MetricsCollector::new(MetricsConfig {
                enabled: true,
                service_name: config.observability.service_name.clone(),
            })
        } else {
            MetricsCollector::disabled()
        });

        // Shared hot cache: one instance backs conversation memory, MCP
        // sessions, and the health check.
        let cache: Arc<dyn HotCache> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(InMemoryCache::new(Duration::from_secs(config.memory.cache.ttl))),
        };

        // MCP session manager.
        let mcp_sessions = if config.mcp_sessions.enabled {
            Some(Arc::new(McpSessionManager::new(
                Some(cache.clone()),
                self.persistence.clone(),
                config.mcp_sessions.clone(),
            )))
        } else {
            None
        };

        // Conversation memory.
        let history = Arc::new(ChatHistoryManager::new(
            MemoryConfig {
                cache: config.memory.cache.clone(),
                persistence: config.memory.persistence.clone(),
                summarization: config.memory.summarization.clone(),
            },
            Some(cache.clone()),
            self.persistence.clone(),
            Some(metrics.clone()),
        )?);

        // Tool registry: decorator and service registrations first, then
        // ERP-backed tools.
        let mut tool_registry = ToolRegistry::new();
        for registration in self.tools {
            match registration {
                ToolRegistration::Dyn(tool) => {
                    tool_registry.register_dyn(tool, crate::tool::ToolSource::Decorator);
                }
                ToolRegistration::Service(descriptor, service) => {
                    tool_registry.register_config(descriptor, service);
                }
            }
        }

        // ERP adapters.
        let mut erp_tools = Vec::new();
        for entry in config.erp_servers() {
            match build_erp_tool(entry, &self.erp_credentials, &mcp_sessions, &metrics) {
                Ok(erp) => {
                    let erp = Arc::new(erp);
                    match erp.connect().await {
                        Ok(()) => {
                            if let Err(err) = register_erp_tools(&erp, &mut tool_registry).await {
                                tracing::warn!(
                                    server = %entry.name,
                                    error = %err,
                                    "failed to enumerate ERP tools"
                                );
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                server = %entry.name,
                                error = %err,
                                "ERP connection failed, its tools are unavailable"
                            );
                        }
                    }
                    erp_tools.push(erp);
                }
                Err(err) => {
                    tracing::warn!(server = %entry.name, error = %err, "skipping ERP server");
                }
            }
        }
        for entry in &config.mcp {
            if entry.enabled && entry.kind != "erp" {
                tracing::warn!(
                    server = %entry.name,
                    kind = %entry.kind,
                    "unsupported MCP server kind, skipping"
                );
            }
        }

        // Middleware chain: tracing, then security, then anything extra.
        let mut middlewares: Vec<Arc<dyn ToolMiddleware>> = vec![
            Arc::new(TracingMiddleware::new(Some(metrics.clone()))),
            Arc::new(SecurityMiddleware::new(
                validator.clone(),
                config.security.allowed_tool_names.clone(),
                config.security.blocked_tool_names.clone(),
            )),
        ];
        middlewares.extend(self.extra_middleware);

        let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(tool_registry), middlewares));

        // Workflows.
        let mut workflows = WorkflowManager::new(default_model.clone());
        workflows.load(&config.workflows, Some(&registry), Some(&self.factory));
        let workflows = Arc::new(workflows);

        // Agent loop.
        let agent = Arc::new(Agent::new(
            default_model,
            self.system_prompt.clone(),
            dispatcher.clone(),
        ));

        // Health checks.
        let health = HealthChecker::new(HealthCheckConfig::default());
        health.register_check("cache", cache_check(cache));
        if let Some(store) = &self.persistence {
            health.register_check("persistence", store_check(store.clone()));
        }
        for erp in &erp_tools {
            health.register_check(erp.name().to_string(), erp_check(erp.clone()));
        }

        // Background persistence.
        history.start_background_persist().await;

        tracing::info!(
            tools = dispatcher.registry().len(),
            workflows = workflows.workflow_names().len(),
            erp_servers = erp_tools.len(),
            "assistant initialized"
        );

        Ok(Assistant {
            config,
            registry,
            factory: self.factory,
            system_prompt: self.system_prompt,
            agent,
            dispatcher,
            history,
            mcp_sessions,
            erp_tools,
            workflows,
            limiter,
            validator,
            metrics,
            health,
        })
    }
}

fn build_erp_tool(
    entry: &McpServerEntry,
    credentials: &HashMap<String, Arc<dyn TokenCredential>>,
    mcp_sessions: &Option<Arc<McpSessionManager>>,
    metrics: &Arc<MetricsCollector>,
) -> Result<ErpTool> {
    let environment_url = entry
        .environment_url
        .clone()
        .ok_or_else(|| Error::Config(format!("ERP server '{}' needs environment_url", entry.name)))?;
    let credential = credentials
        .get(&entry.name)
        .cloned()
        .ok_or_else(|| Error::Config(format!("no credential provided for ERP server '{}'", entry.name)))?;

    let scope = format!("{}/.default", environment_url.trim_end_matches('/'));
    let provider = Arc::new(ErpTokenProvider::new(
        credential,
        scope,
        entry.token_refresh_buffer_secs,
    ));

    let config = ErpToolConfig {
        name: entry.name.clone(),
        environment_url,
        description: entry
            .description
            .clone()
            .unwrap_or_else(|| "ERP tool server".to_string()),
        max_retries: entry.max_retries,
        circuit_breaker_failure_threshold: entry.circuit_breaker_failure_threshold,
        circuit_breaker_recovery_secs: entry.circuit_breaker_recovery_secs,
        ..Default::default()
    };

    let session_manager = if entry.stateful {
        mcp_sessions.clone()
    } else {
        None
    };

    Ok(ErpTool::new(
        config,
        provider,
        session_manager,
        Some(metrics.clone()),
    ))
}
