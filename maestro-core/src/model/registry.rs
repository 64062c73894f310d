//! Model provider registry and factory
//!
//! Named provider configurations with one default, plus an explicit
//! constructor map from provider kind to [`ChatModel`] builder. There is no
//! reflection or name guessing: backends are registered as constructors at
//! process startup, and unknown kinds fail with a configuration error.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ChatModel;

/// Errors from the registry and factory
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("model provider '{0}' not found (available: {1})")]
    UnknownProvider(String, String),

    #[error("no default model provider configured")]
    NoDefault,

    #[error("no constructor registered for provider kind '{0}'")]
    UnknownKind(String),

    #[error("provider '{name}' construction failed: {message}")]
    Construction { name: String, message: String },
}

/// Configuration for one model provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelProviderConfig {
    /// Unique identifier for this configuration (e.g. "gpt4o", "claude")
    pub name: String,
    /// Provider kind, resolved against the factory's constructor map
    pub provider: String,
    /// Model or deployment name
    pub model: String,
    /// API endpoint, for providers that need one
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the API key. Credentials come from the
    /// environment or an external secret store, never from config literals.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// API version, for versioned endpoints
    #[serde(default)]
    pub api_version: Option<String>,
    /// Provider-specific options
    #[serde(default)]
    pub extras: HashMap<String, Value>,
}

impl ModelProviderConfig {
    /// Resolve the API key from the configured environment variable
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

/// Registry of configured model providers
///
/// Names are unique; exactly one provider is the default. The first
/// registration becomes the default unless a later one is marked as such.
#[derive(Default)]
pub struct ModelRegistry {
    providers: HashMap<String, ModelProviderConfig>,
    default: Option<String>,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider configuration
    pub fn register(&mut self, config: ModelProviderConfig, is_default: bool) {
        tracing::debug!(
            name = %config.name,
            provider = %config.provider,
            model = %config.model,
            is_default,
            "registered model provider"
        );
        if is_default || self.default.is_none() {
            self.default = Some(config.name.clone());
        }
        self.providers.insert(config.name.clone(), config);
    }

    /// Load providers from a configuration list
    ///
    /// `default_model` names the default; when absent, the first entry wins.
    pub fn load(&mut self, configs: Vec<ModelProviderConfig>, default_model: Option<&str>) {
        for config in configs {
            let is_default = default_model == Some(config.name.as_str());
            self.register(config, is_default);
        }
        tracing::info!(
            count = self.providers.len(),
            default = self.default.as_deref().unwrap_or("none"),
            "loaded model providers"
        );
    }

    /// Get a provider configuration by name
    pub fn get_provider(&self, name: &str) -> Result<&ModelProviderConfig, RegistryError> {
        self.providers.get(name).ok_or_else(|| {
            let mut available: Vec<&str> = self.providers.keys().map(String::as_str).collect();
            available.sort_unstable();
            RegistryError::UnknownProvider(name.to_string(), available.join(", "))
        })
    }

    /// Get the default provider configuration
    pub fn get_default(&self) -> Result<&ModelProviderConfig, RegistryError> {
        self.default
            .as_deref()
            .and_then(|name| self.providers.get(name))
            .ok_or(RegistryError::NoDefault)
    }

    /// Name of the default provider, if any
    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// List registered provider names
    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Whether a provider is registered
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }
}

/// Constructor for a chat model from its provider configuration
pub type ModelConstructor =
    Arc<dyn Fn(&ModelProviderConfig) -> Result<Arc<dyn ChatModel>, String> + Send + Sync>;

/// Factory mapping provider kinds to chat model constructors
///
/// Deployments register one constructor per provider kind at startup;
/// the orchestrator resolves clients through this map only.
#[derive(Default, Clone)]
pub struct ModelFactory {
    constructors: HashMap<String, ModelConstructor>,
}

impl ModelFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a provider kind
    pub fn register_kind<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&ModelProviderConfig) -> Result<Arc<dyn ChatModel>, String> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    /// Registered provider kinds
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build a chat model for a provider configuration
    pub fn create_client(
        &self,
        config: &ModelProviderConfig,
    ) -> Result<Arc<dyn ChatModel>, RegistryError> {
        let constructor = self
            .constructors
            .get(&config.provider)
            .ok_or_else(|| RegistryError::UnknownKind(config.provider.clone()))?;

        constructor(config).map_err(|message| RegistryError::Construction {
            name: config.name.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelResponse, ProviderError};
    use crate::types::{Message, StopReason, ToolDefinition};

    struct FixedModel(String);

    #[async_trait::async_trait]
    impl ChatModel for FixedModel {
        fn name(&self) -> &str {
            &self.0
        }

        async fn generate(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            _system_prompt: Option<String>,
        ) -> Result<ModelResponse, ProviderError> {
            Ok(ModelResponse {
                message: Message::assistant("ok"),
                stop_reason: StopReason::EndTurn,
                usage: None,
            })
        }
    }

    fn config(name: &str, provider: &str) -> ModelProviderConfig {
        ModelProviderConfig {
            name: name.to_string(),
            provider: provider.to_string(),
            model: "test-model".to_string(),
            endpoint: None,
            api_key_env: None,
            api_version: None,
            extras: HashMap::new(),
        }
    }

    #[test]
    fn test_first_registration_becomes_default() {
        let mut registry = ModelRegistry::new();
        registry.register(config("a", "mock"), false);
        registry.register(config("b", "mock"), false);
        assert_eq!(registry.default_name(), Some("a"));
    }

    #[test]
    fn test_explicit_default_wins() {
        let mut registry = ModelRegistry::new();
        registry.register(config("a", "mock"), false);
        registry.register(config("b", "mock"), true);
        assert_eq!(registry.default_name(), Some("b"));
        assert_eq!(registry.get_default().unwrap().name, "b");
    }

    #[test]
    fn test_unknown_provider_error_lists_available() {
        let mut registry = ModelRegistry::new();
        registry.register(config("a", "mock"), false);
        let err = registry.get_provider("missing").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("missing"));
        assert!(text.contains('a'));
    }

    #[test]
    fn test_empty_registry_has_no_default() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.get_default(),
            Err(RegistryError::NoDefault)
        ));
    }

    #[test]
    fn test_load_with_default_model() {
        let mut registry = ModelRegistry::new();
        registry.load(vec![config("a", "mock"), config("b", "mock")], Some("b"));
        assert_eq!(registry.default_name(), Some("b"));
        assert_eq!(registry.list_providers(), vec!["a", "b"]);
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_factory_resolves_registered_kind() {
        let mut factory = ModelFactory::new();
        factory.register_kind("mock", |cfg| {
            Ok(Arc::new(FixedModel(cfg.model.clone())) as Arc<dyn ChatModel>)
        });

        let client = factory.create_client(&config("a", "mock")).unwrap();
        assert_eq!(client.name(), "test-model");
    }

    #[test]
    fn test_factory_rejects_unknown_kind() {
        let factory = ModelFactory::new();
        let err = factory.create_client(&config("a", "exotic")).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownKind(_)));
    }
}
