//! ERP tool adapter
//!
//! Connects to the ERP tool server over an authenticated HTTP channel and
//! executes remote tools with session-context injection, retry, and
//! circuit breaking. Remote tools are exposed to the agent loop through
//! [`register_erp_tools`], which wraps each one as a registry entry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::Instrument;

use super::breaker::CircuitBreaker;
use super::token::ErpTokenProvider;
use super::ErpError;
use crate::mcp::McpSessionManager;
use crate::metrics::MetricsCollector;
use crate::tool::{DynTool, ToolContext, ToolError, ToolRegistry, ToolSource};

/// Configuration for the ERP tool adapter
#[derive(Debug, Clone)]
pub struct ErpToolConfig {
    /// Server name, also used as the MCP session server key
    pub name: String,
    /// Base environment URL; the tool endpoint is `<url>/mcp`
    pub environment_url: String,
    pub description: String,
    /// Retry budget per call (attempts = max_retries + 1)
    pub max_retries: u32,
    pub retry_backoff_base_secs: f64,
    pub retry_backoff_max_secs: f64,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_recovery_secs: f64,
    /// Split HTTP timeouts
    pub timeout_connect_secs: u64,
    pub timeout_read_secs: u64,
    pub timeout_write_secs: u64,
    pub timeout_pool_secs: u64,
}

impl Default for ErpToolConfig {
    fn default() -> Self {
        Self {
            name: "erp".to_string(),
            environment_url: String::new(),
            description: "ERP tool server".to_string(),
            max_retries: 3,
            retry_backoff_base_secs: 1.0,
            retry_backoff_max_secs: 30.0,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_recovery_secs: 30.0,
            timeout_connect_secs: 10,
            timeout_read_secs: 60,
            timeout_write_secs: 10,
            timeout_pool_secs: 5,
        }
    }
}

impl ErpToolConfig {
    /// Tool endpoint URL
    pub fn endpoint(&self) -> String {
        format!("{}/mcp", self.environment_url.trim_end_matches('/'))
    }
}

/// A tool exposed by the remote server
#[derive(Debug, Clone)]
pub struct ErpRemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// The wire channel to the ERP tool server
#[async_trait::async_trait]
pub trait ErpChannel: Send + Sync {
    /// Invoke a remote tool
    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<Value, ErpError>;

    /// Enumerate remote tools
    async fn list_tools(&self) -> Result<Vec<ErpRemoteTool>, ErpError>;
}

/// HTTP channel carrying `Authorization: Bearer <token>` on every request
pub struct HttpErpChannel {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpErpChannel {
    pub fn new(config: &ErpToolConfig, token: &str) -> Result<Self, ErpError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ErpError::Config(format!("invalid token value: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.timeout_connect_secs))
            .timeout(Duration::from_secs(config.timeout_read_secs))
            .pool_idle_timeout(Duration::from_secs(config.timeout_pool_secs))
            .build()
            .map_err(|e| ErpError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
        })
    }

    async fn post(&self, body: Value) -> Result<Value, ErpError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(ErpError::Auth(format!("remote rejected token: {}", status)));
        }
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(ErpError::RateLimited { retry_after_secs });
        }
        if status.is_server_error() {
            return Err(ErpError::Transient(format!("server error: {}", status)));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ErpError::Status {
                code: status.as_u16(),
                message,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ErpError::Protocol(format!("invalid response body: {}", e)))
    }
}

fn map_transport_error(err: reqwest::Error) -> ErpError {
    if err.is_timeout() || err.is_connect() {
        ErpError::Transient(err.to_string())
    } else {
        ErpError::Protocol(err.to_string())
    }
}

#[async_trait::async_trait]
impl ErpChannel for HttpErpChannel {
    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<Value, ErpError> {
        let body = serde_json::json!({
            "method": "tools/call",
            "params": {"name": name, "arguments": args},
        });
        let response = self.post(body).await?;
        Ok(response.get("result").cloned().unwrap_or(response))
    }

    async fn list_tools(&self) -> Result<Vec<ErpRemoteTool>, ErpError> {
        let response = self.post(serde_json::json!({"method": "tools/list"})).await?;
        let tools = response
            .get("result")
            .and_then(|r| r.get("tools"))
            .or_else(|| response.get("tools"))
            .and_then(Value::as_array)
            .ok_or_else(|| ErpError::Protocol("missing tools list in response".into()))?;

        Ok(tools
            .iter()
            .filter_map(|tool| {
                Some(ErpRemoteTool {
                    name: tool.get("name")?.as_str()?.to_string(),
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: tool
                        .get("inputSchema")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                })
            })
            .collect())
    }
}

/// Builds a channel from a bearer token; swapped out in tests
pub type ChannelConnector =
    Box<dyn Fn(&ErpToolConfig, &str) -> Result<Arc<dyn ErpChannel>, ErpError> + Send + Sync>;

/// ERP tool adapter with token lifecycle, retry, circuit breaking, and
/// session-context injection
pub struct ErpTool {
    config: ErpToolConfig,
    token_provider: Arc<ErpTokenProvider>,
    session_manager: Option<Arc<McpSessionManager>>,
    breaker: CircuitBreaker,
    channel: RwLock<Option<Arc<dyn ErpChannel>>>,
    connector: ChannelConnector,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ErpTool {
    /// Create an adapter using the HTTP channel
    pub fn new(
        config: ErpToolConfig,
        token_provider: Arc<ErpTokenProvider>,
        session_manager: Option<Arc<McpSessionManager>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        Self::with_connector(
            config,
            token_provider,
            session_manager,
            metrics,
            Box::new(|config, token| {
                Ok(Arc::new(HttpErpChannel::new(config, token)?) as Arc<dyn ErpChannel>)
            }),
        )
    }

    /// Create an adapter with a custom channel connector
    pub fn with_connector(
        config: ErpToolConfig,
        token_provider: Arc<ErpTokenProvider>,
        session_manager: Option<Arc<McpSessionManager>>,
        metrics: Option<Arc<MetricsCollector>>,
        connector: ChannelConnector,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            config.name.clone(),
            config.circuit_breaker_failure_threshold,
            Duration::from_secs_f64(config.circuit_breaker_recovery_secs),
        );
        tracing::debug!(
            name = %config.name,
            endpoint = %config.endpoint(),
            max_retries = config.max_retries,
            "ERP tool initialized"
        );
        Self {
            config,
            token_provider,
            session_manager,
            breaker,
            channel: RwLock::new(None),
            connector,
            metrics,
        }
    }

    /// Server name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Tool endpoint URL
    pub fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    /// The breaker guarding this adapter
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Whether a channel is established
    pub async fn is_connected(&self) -> bool {
        self.channel.read().await.is_some()
    }

    /// Acquire a token and establish the channel. Idempotent.
    pub async fn connect(&self) -> Result<(), ErpError> {
        if self.is_connected().await {
            tracing::debug!(name = %self.config.name, "already connected");
            return Ok(());
        }

        let token = self.token_provider.get_token().await?;
        let channel = (self.connector)(&self.config, &token)?;
        *self.channel.write().await = Some(channel);

        tracing::info!(
            name = %self.config.name,
            endpoint = %self.endpoint(),
            "connected to ERP tool server"
        );
        Ok(())
    }

    /// Enumerate the remote server's tools
    pub async fn tools(&self) -> Result<Vec<ErpRemoteTool>, ErpError> {
        let channel = self
            .channel
            .read()
            .await
            .clone()
            .ok_or(ErpError::NotConnected)?;
        channel.list_tools().await
    }

    /// Call a remote tool with session injection, breaker, and retry
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        chat_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Value, ErpError> {
        if !self.is_connected().await {
            return Err(ErpError::NotConnected);
        }

        let span = tracing::info_span!(
            "erp_tool_call",
            erp.server = %self.config.name,
            erp.tool = tool_name,
        );
        let start = std::time::Instant::now();

        let result = self
            .breaker
            .call(|| self.execute_with_retry(tool_name, arguments, chat_id, user_id))
            .instrument(span)
            .await;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let metric_name = format!("{}.{}", self.config.name, tool_name);
        match &result {
            Ok(_) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_tool_call(&metric_name, latency_ms, true);
                }
            }
            Err(err) => {
                tracing::error!(tool = tool_name, error = %err, "ERP tool call failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_tool_call(&metric_name, latency_ms, false);
                    metrics.record_error(err.kind(), "erp_tool");
                }
            }
        }

        result
    }

    /// Drop the channel and the cached token
    pub async fn close(&self) {
        *self.channel.write().await = None;
        self.token_provider.close();
        tracing::info!(name = %self.config.name, "ERP tool closed");
    }

    /// Retry loop run inside the circuit breaker
    ///
    /// 401: refresh the token and retry immediately. 429: honor
    /// Retry-After. Transient: exponential backoff. Anything else
    /// surfaces; the breaker counts whatever finally escapes.
    async fn execute_with_retry(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        chat_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Value, ErpError> {
        let mut attempt: u32 = 0;
        loop {
            match self
                .execute_tool_call(tool_name, arguments.clone(), chat_id, user_id)
                .await
            {
                Ok(result) => return Ok(result),
                Err(ErpError::Auth(_)) if attempt < self.config.max_retries => {
                    tracing::warn!(attempt, tool = tool_name, "got 401, refreshing token");
                    self.refresh_channel().await?;
                }
                Err(ErpError::RateLimited { retry_after_secs })
                    if attempt < self.config.max_retries =>
                {
                    tracing::warn!(
                        attempt,
                        retry_after_secs,
                        tool = tool_name,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                }
                Err(ErpError::Transient(message)) if attempt < self.config.max_retries => {
                    let backoff = (self.config.retry_backoff_base_secs
                        * 2f64.powi(attempt as i32))
                    .min(self.config.retry_backoff_max_secs);
                    tracing::warn!(
                        attempt,
                        backoff_secs = backoff,
                        tool = tool_name,
                        error = %message,
                        "transient error, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                }
                Err(err) => return Err(err),
            }
            attempt += 1;
        }
    }

    /// One attempt: inject session kwargs, call the channel, process any
    /// form-context updates in the result
    async fn execute_tool_call(
        &self,
        tool_name: &str,
        mut arguments: Map<String, Value>,
        chat_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Value, ErpError> {
        let channel = self
            .channel
            .read()
            .await
            .clone()
            .ok_or(ErpError::NotConnected)?;

        if let (Some(manager), Some(chat_id)) = (&self.session_manager, chat_id) {
            let session = manager
                .get_or_create(chat_id, &self.config.name, user_id)
                .await;
            for (key, value) in manager.build_kwargs(&session) {
                arguments.insert(key, value);
            }
        }

        let result = channel.call_tool(tool_name, arguments).await?;

        if let (Some(manager), Some(chat_id)) = (&self.session_manager, chat_id) {
            self.process_form_context(manager, &result, chat_id).await;
        }

        Ok(result)
    }

    /// Pick up `form_context` updates embedded in a tool result
    async fn process_form_context(
        &self,
        manager: &Arc<McpSessionManager>,
        result: &Value,
        chat_id: &str,
    ) {
        let Some(obj) = result.as_object() else { return };
        let form_context = obj.get("form_context").and_then(Value::as_object);
        let form_name = obj
            .get("form_name")
            .or_else(|| obj.get("_form_name"))
            .and_then(Value::as_str);

        if let (Some(context), Some(form_name)) = (form_context, form_name) {
            let session = manager.get_or_create(chat_id, &self.config.name, None).await;
            manager
                .update_form_context(&session.session_id, form_name, context.clone())
                .await;
            tracing::debug!(form_name, chat_id, "updated ERP form context");
        }
    }

    async fn refresh_channel(&self) -> Result<(), ErpError> {
        let token = self.token_provider.refresh_token().await?;
        let channel = (self.connector)(&self.config, &token)?;
        *self.channel.write().await = Some(channel);
        tracing::debug!(name = %self.config.name, "refreshed ERP channel token");
        Ok(())
    }
}

/// Registry wrapper exposing one remote ERP tool to the agent loop
struct ErpToolAdapter {
    erp: Arc<ErpTool>,
    remote: ErpRemoteTool,
}

impl DynTool for ErpToolAdapter {
    fn name(&self) -> &str {
        &self.remote.name
    }

    fn description(&self) -> &str {
        &self.remote.description
    }

    fn input_schema(&self) -> Value {
        self.remote.input_schema.clone()
    }

    fn tags(&self) -> Vec<String> {
        vec![self.erp.name().to_string()]
    }

    fn execute_raw(
        &self,
        input: Value,
        ctx: ToolContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, ToolError>> + Send + '_>>
    {
        Box::pin(async move {
            let args = match input {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                _ => return Err(ToolError::Custom("tool input must be a JSON object".into())),
            };
            let result = self
                .erp
                .call_tool(
                    &self.remote.name,
                    args,
                    ctx.chat_id.as_deref(),
                    ctx.user_id.as_deref(),
                )
                .await
                .map_err(|err| ToolError::Custom(err.to_string()))?;

            Ok(match result {
                Value::String(text) => text,
                other => other.to_string(),
            })
        })
    }
}

/// Register every remote ERP tool in the registry
///
/// The adapter must be connected. Remote tools register under the config
/// source: a programmatic (decorator) tool with the same name wins.
pub async fn register_erp_tools(
    erp: &Arc<ErpTool>,
    registry: &mut ToolRegistry,
) -> Result<usize, ErpError> {
    let tools = erp.tools().await?;
    let count = tools.len();
    for remote in tools {
        registry.register_dyn(
            Arc::new(ErpToolAdapter {
                erp: Arc::clone(erp),
                remote,
            }),
            ToolSource::Config,
        );
    }
    tracing::info!(name = %erp.name(), count, "registered ERP tools");
    Ok(count)
}
