//! Tool registry and descriptor model
//!
//! Tools reach the registry from two sources: programmatic registration of
//! typed [`Tool`] implementations (the decorator source), and
//! configuration-file descriptors whose parameter schema is declared
//! externally and whose implementation binds by name to a [`ToolService`]
//! (the config source). Both live in one table keyed by name; on a name
//! conflict the decorator source wins.

pub mod middleware;

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::security::{RateLimitExceeded, ValidationError};
use crate::types::ToolDefinition;

pub use middleware::{
    AuditMiddleware, Next, PerformanceMiddleware, RateLimitMiddleware, SecurityMiddleware,
    ToolDispatcher, ToolInvocation, ToolMiddleware, TracingMiddleware,
};

/// Errors that can occur during tool execution
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    NotFound(String),

    #[error("tool '{0}' is disabled")]
    Disabled(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    RateLimited(#[from] RateLimitExceeded),

    #[error("{0}")]
    Custom(String),
}

impl From<String> for ToolError {
    fn from(s: String) -> Self {
        Self::Custom(s)
    }
}

impl From<&str> for ToolError {
    fn from(s: &str) -> Self {
        Self::Custom(s.to_string())
    }
}

/// Per-call context threaded through tool execution
///
/// Stateful tools use the chat and user identifiers to resolve their MCP
/// session; plain tools ignore it.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub chat_id: Option<String>,
    pub user_id: Option<String>,
}

/// Where a tool descriptor came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    /// Registered programmatically at startup
    Decorator,
    /// Declared in a configuration file and bound to a service by name
    Config,
}

/// Descriptor for a registered tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's parameters
    pub parameters: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: ToolSource,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Trait for implementing typed tools
///
/// The input type derives `Deserialize` and `JsonSchema`, so the parameter
/// schema presented to the model is generated from the Rust type.
///
/// # Example
///
/// ```rust
/// use maestro_core::tool::{Tool, ToolContext, ToolError};
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct EchoInput {
///     /// Message to echo back
///     message: String,
/// }
///
/// struct EchoTool;
///
/// impl Tool for EchoTool {
///     type Input = EchoInput;
///
///     fn name(&self) -> &str { "echo" }
///     fn description(&self) -> &str { "Echo a message" }
///
///     fn execute(
///         &self,
///         input: Self::Input,
///         _ctx: &ToolContext,
///     ) -> impl std::future::Future<Output = Result<String, ToolError>> + Send {
///         async move { Ok(input.message) }
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The input type for this tool
    type Input: DeserializeOwned + JsonSchema;

    /// The name of the tool (e.g. "weather_lookup")
    fn name(&self) -> &str;

    /// A description of what the tool does
    fn description(&self) -> &str;

    /// Tags for grouping and lookup
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute the tool with typed input
    fn execute(
        &self,
        input: Self::Input,
        ctx: &ToolContext,
    ) -> impl std::future::Future<Output = Result<String, ToolError>> + Send;

    /// JSON schema for this tool's input, generated from the type
    fn input_schema(&self) -> Value {
        let schema = schemars::schema_for!(Self::Input);
        serde_json::to_value(schema).expect("failed to serialize schema")
    }
}

/// Object-safe trait for dynamic tool dispatch
///
/// Implement [`Tool`] instead and use [`box_tool`] to convert.
pub trait DynTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    fn tags(&self) -> Vec<String>;
    fn execute_raw(
        &self,
        input: Value,
        ctx: ToolContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, ToolError>> + Send + '_>>;
}

/// Convert a `Tool` into a type-erased `Arc<dyn DynTool>`
pub fn box_tool<T: Tool + 'static>(tool: T) -> Arc<dyn DynTool> {
    Arc::new(ToolWrapper(tool))
}

struct ToolWrapper<T>(T);

impl<T: Tool + 'static> DynTool for ToolWrapper<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn input_schema(&self) -> Value {
        self.0.input_schema()
    }

    fn tags(&self) -> Vec<String> {
        self.0.tags()
    }

    fn execute_raw(
        &self,
        input: Value,
        ctx: ToolContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, ToolError>> + Send + '_>>
    {
        Box::pin(async move {
            let typed_input: T::Input = serde_json::from_value(input)
                .map_err(|e| ToolError::Custom(format!("failed to deserialize input: {}", e)))?;
            self.0.execute(typed_input, &ctx).await
        })
    }
}

/// Service capability backing config-declared tools
///
/// A service receives the full call argument map and returns a string.
#[async_trait::async_trait]
pub trait ToolService: Send + Sync {
    async fn run(&self, call: Map<String, Value>) -> Result<String, ToolError>;
}

/// A config-declared tool bound to a service
struct ServiceTool {
    descriptor: ToolDescriptor,
    service: Arc<dyn ToolService>,
}

impl DynTool for ServiceTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn input_schema(&self) -> Value {
        self.descriptor.parameters.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.descriptor.tags.clone()
    }

    fn execute_raw(
        &self,
        input: Value,
        _ctx: ToolContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, ToolError>> + Send + '_>>
    {
        Box::pin(async move {
            let call = match input {
                Value::Object(map) => map,
                other => {
                    return Err(ToolError::Custom(format!(
                        "tool input must be a JSON object, got: {}",
                        value_type_name(&other)
                    )))
                }
            };
            self.service.run(call).await
        })
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn DynTool>,
}

/// Registry of all tools known to the assistant
///
/// Names are unique. Decorator-source registrations win conflicts against
/// config-source ones; a later registration from the same source replaces
/// the earlier one.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed tool (decorator source)
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_with_tags(tool, Vec::new())
    }

    /// Register a typed tool with extra tags (decorator source)
    pub fn register_with_tags<T: Tool + 'static>(&mut self, tool: T, extra_tags: Vec<String>) {
        let handler = box_tool(tool);
        let mut tags = handler.tags();
        tags.extend(extra_tags);
        let descriptor = ToolDescriptor {
            name: handler.name().to_string(),
            description: handler.description().to_string(),
            parameters: handler.input_schema(),
            tags,
            source: ToolSource::Decorator,
            enabled: true,
        };
        self.insert(descriptor, handler);
    }

    /// Register a pre-erased tool under the given source
    pub fn register_dyn(&mut self, handler: Arc<dyn DynTool>, source: ToolSource) {
        let descriptor = ToolDescriptor {
            name: handler.name().to_string(),
            description: handler.description().to_string(),
            parameters: handler.input_schema(),
            tags: handler.tags(),
            source,
            enabled: true,
        };
        self.insert(descriptor, handler);
    }

    /// Register a config-declared tool bound to a service
    pub fn register_config(&mut self, descriptor: ToolDescriptor, service: Arc<dyn ToolService>) {
        if !descriptor.enabled {
            tracing::debug!(tool = %descriptor.name, "skipping disabled tool");
            return;
        }
        let handler: Arc<dyn DynTool> = Arc::new(ServiceTool {
            descriptor: descriptor.clone(),
            service,
        });
        self.insert(descriptor, handler);
    }

    fn insert(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn DynTool>) {
        if let Some(existing) = self.tools.get(&descriptor.name) {
            if existing.descriptor.source == ToolSource::Decorator
                && descriptor.source == ToolSource::Config
            {
                tracing::warn!(
                    tool = %descriptor.name,
                    "config tool conflicts with decorator tool, keeping decorator"
                );
                return;
            }
        }
        tracing::debug!(
            tool = %descriptor.name,
            source = ?descriptor.source,
            tags = ?descriptor.tags,
            "registered tool"
        );
        self.tools
            .insert(descriptor.name.clone(), RegisteredTool { descriptor, handler });
    }

    /// Look up a tool handler by name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn DynTool>> {
        self.tools.get(name).map(|t| &t.handler)
    }

    /// Look up a descriptor by name
    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    /// All enabled tools with a given tag
    pub fn by_tag(&self, tag: &str) -> Vec<&ToolDescriptor> {
        let mut found: Vec<&ToolDescriptor> = self
            .tools
            .values()
            .filter(|t| t.descriptor.enabled && t.descriptor.tags.iter().any(|t| t == tag))
            .map(|t| &t.descriptor)
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Definitions of all enabled tools, as presented to the model
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .filter(|t| t.descriptor.enabled)
            .map(|t| ToolDefinition {
                name: t.descriptor.name.clone(),
                description: t.descriptor.description.clone(),
                input_schema: t.descriptor.parameters.clone(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Names of all registered tools
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct EchoInput {
        message: String,
    }

    struct EchoTool;

    impl Tool for EchoTool {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo a message"
        }

        fn tags(&self) -> Vec<String> {
            vec!["demo".to_string()]
        }

        fn execute(
            &self,
            input: Self::Input,
            _ctx: &ToolContext,
        ) -> impl std::future::Future<Output = Result<String, ToolError>> + Send {
            async move { Ok(input.message) }
        }
    }

    struct UpperService;

    #[async_trait::async_trait]
    impl ToolService for UpperService {
        async fn run(&self, call: Map<String, Value>) -> Result<String, ToolError> {
            let text = call
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(text.to_uppercase())
        }
    }

    fn config_descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: "Uppercase text".to_string(),
            parameters: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            tags: vec!["text".to_string()],
            source: ToolSource::Config,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_typed_tool_roundtrip() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let tool = registry.get("echo").unwrap();
        let result = tool
            .execute_raw(json!({"message": "hi"}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn test_service_tool_executes() {
        let mut registry = ToolRegistry::new();
        registry.register_config(config_descriptor("upper"), Arc::new(UpperService));

        let tool = registry.get("upper").unwrap();
        let result = tool
            .execute_raw(json!({"text": "abc"}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result, "ABC");
    }

    #[tokio::test]
    async fn test_service_tool_rejects_non_object_input() {
        let mut registry = ToolRegistry::new();
        registry.register_config(config_descriptor("upper"), Arc::new(UpperService));

        let tool = registry.get("upper").unwrap();
        let err = tool
            .execute_raw(json!("not an object"), ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_decorator_wins_name_conflict() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register_config(config_descriptor("echo"), Arc::new(UpperService));

        let descriptor = registry.descriptor("echo").unwrap();
        assert_eq!(descriptor.source, ToolSource::Decorator);
    }

    #[test]
    fn test_config_replaced_by_decorator() {
        let mut registry = ToolRegistry::new();
        registry.register_config(config_descriptor("echo"), Arc::new(UpperService));
        registry.register(EchoTool);

        let descriptor = registry.descriptor("echo").unwrap();
        assert_eq!(descriptor.source, ToolSource::Decorator);
    }

    #[test]
    fn test_disabled_tool_not_registered() {
        let mut registry = ToolRegistry::new();
        let mut descriptor = config_descriptor("upper");
        descriptor.enabled = false;
        registry.register_config(descriptor, Arc::new(UpperService));
        assert!(registry.get("upper").is_none());
    }

    #[test]
    fn test_tag_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register_config(config_descriptor("upper"), Arc::new(UpperService));

        let demo = registry.by_tag("demo");
        assert_eq!(demo.len(), 1);
        assert_eq!(demo[0].name, "echo");

        assert!(registry.by_tag("nope").is_empty());
    }

    #[test]
    fn test_definitions_sorted_and_enabled_only() {
        let mut registry = ToolRegistry::new();
        registry.register_config(config_descriptor("zeta"), Arc::new(UpperService));
        registry.register(EchoTool);

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[1].name, "zeta");
    }

    #[test]
    fn test_schema_generated_from_type() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let descriptor = registry.descriptor("echo").unwrap();
        let schema = descriptor.parameters.to_string();
        assert!(schema.contains("message"));
    }
}
