//! Typed configuration surface
//!
//! The runtime reads one TOML document covering models, tools, MCP
//! servers, workflows, memory, security, and observability. Credentials
//! are always environment-variable indirections (`*_env` fields); literal
//! secrets in config are not supported.

use serde::{Deserialize, Serialize};

use crate::mcp::McpSessionConfig;
use crate::memory::{CacheConfig, PersistenceConfig, SummarizationConfig};
use crate::model::ModelProviderConfig;
use crate::security::{RateLimitConfig, ValidationConfig};
use crate::workflow::WorkflowConfig;

/// Complete runtime configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Model provider configurations
    pub models: Vec<ModelProviderConfig>,
    /// Name of the default model; first entry when absent
    pub default_model: Option<String>,
    pub tools: ToolsConfig,
    /// External tool servers
    pub mcp: Vec<McpServerEntry>,
    pub mcp_sessions: McpSessionConfig,
    pub workflows: Vec<WorkflowConfig>,
    pub memory: MemorySection,
    pub security: SecuritySection,
    pub observability: ObservabilityConfig,
}

impl AssistantConfig {
    /// Parse from a TOML document
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("invalid configuration: {}", e))
    }

    /// Load from a TOML file
    pub async fn load(path: impl AsRef<std::path::Path>) -> Result<Self, String> {
        let text = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| format!("failed to read config file: {}", e))?;
        Self::from_toml(&text)
    }

    /// ERP-kind MCP entries that are enabled
    pub fn erp_servers(&self) -> Vec<&McpServerEntry> {
        self.mcp
            .iter()
            .filter(|entry| entry.enabled && entry.kind == "erp")
            .collect()
    }
}

/// Tool loading configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory holding config-declared tool descriptors
    pub config_dir: String,
    pub enable_decorator_tools: bool,
    pub enable_json_tools: bool,
    /// Explicit list of tool modules to load
    pub modules: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            config_dir: "config/tools".to_string(),
            enable_decorator_tools: true,
            enable_json_tools: true,
            modules: Vec::new(),
        }
    }
}

/// One external tool server entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerEntry {
    pub name: String,
    /// Server kind; `erp` is wired to the OAuth adapter
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the server keeps per-conversation state
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub session_header: Option<String>,
    #[serde(default)]
    pub form_context_header: Option<String>,
    #[serde(default)]
    pub requires_user_id: bool,
    /// Environment URL for erp-kind servers
    #[serde(default)]
    pub environment_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Environment variable holding the OAuth client secret
    #[serde(default)]
    pub client_secret_env: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_refresh_buffer")]
    pub token_refresh_buffer_secs: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_recovery")]
    pub circuit_breaker_recovery_secs: f64,
}

fn default_true() -> bool {
    true
}

fn default_refresh_buffer() -> i64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_recovery() -> f64 {
    30.0
}

/// Memory configuration section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub cache: CacheConfig,
    pub persistence: PersistenceConfig,
    pub summarization: SummarizationConfig,
}

/// Security configuration section
///
/// Splits into the rate limiter and validator configs consumed by the
/// request path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub rate_limit_enabled: bool,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub tokens_per_minute: u64,
    pub max_concurrent_requests: u32,
    pub per_user: bool,
    pub burst_multiplier: f64,
    pub max_question_length: usize,
    pub max_tool_param_length: usize,
    pub block_prompt_injection: bool,
    pub block_pii: bool,
    pub redact_pii: bool,
    /// Whitelist of tool names; all allowed when absent
    pub allowed_tool_names: Option<Vec<String>>,
    pub blocked_tool_names: Vec<String>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            rate_limit_enabled: true,
            requests_per_minute: 60,
            requests_per_hour: 1_000,
            tokens_per_minute: 100_000,
            max_concurrent_requests: 10,
            per_user: true,
            burst_multiplier: 1.5,
            max_question_length: 32_000,
            max_tool_param_length: 10_000,
            block_prompt_injection: true,
            block_pii: false,
            redact_pii: false,
            allowed_tool_names: None,
            blocked_tool_names: Vec::new(),
        }
    }
}

impl SecuritySection {
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.rate_limit_enabled,
            requests_per_minute: self.requests_per_minute,
            requests_per_hour: self.requests_per_hour,
            tokens_per_minute: self.tokens_per_minute,
            max_concurrent_requests: self.max_concurrent_requests,
            per_user: self.per_user,
            burst_multiplier: self.burst_multiplier,
        }
    }

    pub fn validation(&self) -> ValidationConfig {
        ValidationConfig {
            max_question_length: self.max_question_length,
            max_tool_param_length: self.max_tool_param_length,
            block_prompt_injection: self.block_prompt_injection,
            injection_patterns: Vec::new(),
            block_pii: self.block_pii,
            redact_pii: self.redact_pii,
            blocked_patterns: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub tracing_enabled: bool,
    pub tracing_exporter: String,
    pub tracing_endpoint: Option<String>,
    pub sample_rate: f64,
    pub metrics_enabled: bool,
    pub metrics_exporter: String,
    pub service_name: String,
    pub environment: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            tracing_enabled: false,
            tracing_exporter: "console".to_string(),
            tracing_endpoint: None,
            sample_rate: 1.0,
            metrics_enabled: true,
            metrics_exporter: "console".to_string(),
            service_name: "assistant".to_string(),
            environment: "development".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowKind;

    #[test]
    fn test_empty_config_has_defaults() {
        let config = AssistantConfig::from_toml("").unwrap();
        assert!(config.models.is_empty());
        assert!(config.security.rate_limit_enabled);
        assert_eq!(config.security.requests_per_minute, 60);
        assert_eq!(config.memory.cache.ttl, 3600);
        assert!(!config.mcp_sessions.enabled);
    }

    #[test]
    fn test_full_config_parses() {
        let toml = r#"
            default_model = "gpt4o"

            [[models]]
            name = "gpt4o"
            provider = "azure_openai"
            model = "gpt-4o"
            endpoint = "https://example.openai.azure.com"
            api_key_env = "AZURE_OPENAI_API_KEY"
            api_version = "2024-10-01-preview"

            [[models]]
            name = "claude"
            provider = "anthropic"
            model = "claude-sonnet"
            api_key_env = "ANTHROPIC_API_KEY"

            [tools]
            config_dir = "config/tools"
            enable_decorator_tools = true
            enable_json_tools = false

            [[mcp]]
            name = "erp"
            type = "erp"
            stateful = true
            environment_url = "https://erp.example.com"
            client_id = "app-id"
            tenant_id = "tenant-id"
            client_secret_env = "ERP_CLIENT_SECRET"

            [mcp_sessions]
            enabled = true
            session_ttl = 1800
            persist_sessions = true

            [[workflows]]
            name = "support"
            type = "graph"
            start = "Triage"

            [[workflows.agents]]
            name = "Triage"
            instructions = "Classify the request."

            [[workflows.agents]]
            name = "Billing"
            instructions = "Handle billing."

            [[workflows.edges]]
            from = "Triage"
            to = "Billing"
            condition = "output.category == 'billing'"
            priority = 1

            [memory.cache]
            enabled = true
            host = "redis.internal"
            ttl = 7200

            [memory.persistence]
            enabled = true
            account = "store1"
            schedule = "ttl+300"

            [memory.summarization]
            enabled = true
            max_tokens = 6000

            [security]
            requests_per_minute = 30
            block_pii = true
            blocked_tool_names = ["shell"]

            [observability]
            tracing_enabled = true
            service_name = "erp-assistant"
        "#;

        let config = AssistantConfig::from_toml(toml).unwrap();
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.default_model.as_deref(), Some("gpt4o"));
        assert_eq!(config.erp_servers().len(), 1);
        assert_eq!(config.mcp[0].token_refresh_buffer_secs, 300);
        assert!(config.mcp_sessions.enabled);
        assert_eq!(config.workflows[0].kind, WorkflowKind::Graph);
        assert_eq!(config.workflows[0].edges.len(), 1);
        assert_eq!(config.memory.cache.ttl, 7200);
        assert_eq!(config.security.requests_per_minute, 30);
        assert_eq!(config.security.blocked_tool_names, vec!["shell"]);
        assert_eq!(config.observability.service_name, "erp-assistant");
    }

    #[test]
    fn test_security_section_splits() {
        let section = SecuritySection {
            requests_per_minute: 5,
            redact_pii: true,
            ..Default::default()
        };
        assert_eq!(section.rate_limit().requests_per_minute, 5);
        assert!(section.validation().redact_pii);
    }

    #[test]
    fn test_disabled_mcp_entry_not_an_erp_server() {
        let toml = r#"
            [[mcp]]
            name = "erp"
            type = "erp"
            enabled = false
        "#;
        let config = AssistantConfig::from_toml(toml).unwrap();
        assert!(config.erp_servers().is_empty());
    }

    #[test]
    fn test_custom_workflow_kind_alias() {
        let toml = r#"
            [[workflows]]
            name = "legacy"
            type = "custom"
            start = "A"

            [[workflows.agents]]
            name = "A"
        "#;
        let config = AssistantConfig::from_toml(toml).unwrap();
        assert_eq!(config.workflows[0].kind, WorkflowKind::Graph);
    }
}
