//! Provider directory and constructor catalog.
//!
//! [`ProviderRegistry`] holds live adapter instances for orchestration;
//! [`ProviderCatalog`] is the constructor-function table that builds them
//! from configuration, keyed by provider kind. New provider types register
//! a factory; no runtime type introspection is involved.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    AnthropicProviderFactory, GeminiProviderFactory, LlmProvider, OllamaProviderFactory,
    OpenAiProviderFactory, ProviderError,
};
use crate::config::ModelConfig;
use crate::resilience::CircuitBreakerConfig;

/// Thread-safe, insertion-ordered directory of provider adapters.
///
/// Names are case-insensitive; registering under an existing name replaces
/// the adapter in place (last writer wins). Every read hands out a
/// snapshot, so iteration never aliases internal state.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<dyn LlmProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. A same-named adapter is replaced in place.
    pub fn register(&self, provider: Arc<dyn LlmProvider>) {
        let mut providers = self.providers.write();
        let name = provider.name().to_lowercase();
        match providers.iter().position(|p| p.name().to_lowercase() == name) {
            Some(index) => providers[index] = provider,
            None => providers.push(provider),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        let wanted = name.to_lowercase();
        self.providers
            .read()
            .iter()
            .find(|p| p.name().to_lowercase() == wanted)
            .cloned()
    }

    /// Every registered adapter, in registration order.
    pub fn all(&self) -> Vec<Arc<dyn LlmProvider>> {
        self.providers.read().clone()
    }

    /// Adapters whose `is_configured` predicate holds.
    pub fn configured(&self) -> Vec<Arc<dyn LlmProvider>> {
        self.providers
            .read()
            .iter()
            .filter(|p| p.is_configured())
            .cloned()
            .collect()
    }

    /// Intersection with `names`, preserving registry order.
    pub fn by_names<S: AsRef<str>>(&self, names: &[S]) -> Vec<Arc<dyn LlmProvider>> {
        let wanted: Vec<String> = names.iter().map(|n| n.as_ref().to_lowercase()).collect();
        self.providers
            .read()
            .iter()
            .filter(|p| wanted.contains(&p.name().to_lowercase()))
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .providers
            .read()
            .iter()
            .map(|p| p.display_name())
            .collect();
        f.debug_struct("ProviderRegistry")
            .field("providers", &names)
            .finish()
    }
}

/// Builds a provider adapter from configuration.
///
/// Implement this to add a provider type: declare its kind string and how
/// an adapter is constructed from `(http client, model config, breaker
/// config)`.
pub trait ProviderFactory: Send + Sync {
    /// Unique kind identifier ("anthropic", "openai", ...).
    fn kind(&self) -> &'static str;

    /// Construct a configured adapter.
    fn build(
        &self,
        client: reqwest::Client,
        config: ModelConfig,
        breaker: CircuitBreakerConfig,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Human-readable description.
    fn description(&self) -> &'static str {
        "LLM provider"
    }
}

/// Registry of provider factories, keyed by kind.
#[derive(Default)]
pub struct ProviderCatalog {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the four built-in provider kinds registered.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(OpenAiProviderFactory));
        catalog.register(Arc::new(AnthropicProviderFactory));
        catalog.register(Arc::new(GeminiProviderFactory));
        catalog.register(Arc::new(OllamaProviderFactory));
        catalog
    }

    /// Register a factory. A same-kind factory is replaced.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.kind().to_string(), factory);
    }

    /// Build an adapter for `config.provider`.
    pub fn build(
        &self,
        client: reqwest::Client,
        config: ModelConfig,
        breaker: CircuitBreakerConfig,
    ) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        let factory = self
            .factories
            .get(&config.provider.to_lowercase())
            .ok_or_else(|| ProviderError::UnknownKind(config.provider.clone()))?;
        factory.build(client, config, breaker)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_lowercase())
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCatalog")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::RawCompletion;
    use async_trait::async_trait;

    struct NamedProvider {
        name: String,
        configured: bool,
        config: ModelConfig,
    }

    impl NamedProvider {
        fn new(name: &str, configured: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                configured,
                config: ModelConfig::new(name, "test-model"),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for NamedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model_id(&self) -> &str {
            "test-model"
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        fn config(&self) -> &ModelConfig {
            &self.config
        }

        async fn send_request(
            &self,
            _prompt: &str,
            _system_prompt: Option<&str>,
        ) -> Result<RawCompletion, ProviderError> {
            Ok(RawCompletion {
                content: "ok".to_string(),
                model: "test-model".to_string(),
                prompt_tokens: 0,
                completion_tokens: 0,
            })
        }
    }

    #[test]
    fn test_register_and_lookup_case_insensitive() {
        let registry = ProviderRegistry::new();
        registry.register(NamedProvider::new("OpenAI", true));

        assert!(registry.contains("openai"));
        assert!(registry.get("OPENAI").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_last_writer_wins_in_place() {
        let registry = ProviderRegistry::new();
        registry.register(NamedProvider::new("alpha", true));
        registry.register(NamedProvider::new("beta", true));
        registry.register(NamedProvider::new("Alpha", false));

        assert_eq!(registry.len(), 2);
        // replacement kept alpha's original position
        let all = registry.all();
        assert_eq!(all[0].name(), "Alpha");
        assert_eq!(all[1].name(), "beta");
        assert!(!all[0].is_configured());
    }

    #[test]
    fn test_configured_subset() {
        let registry = ProviderRegistry::new();
        registry.register(NamedProvider::new("ready", true));
        registry.register(NamedProvider::new("missing-key", false));

        let configured = registry.configured();
        assert_eq!(configured.len(), 1);
        assert_eq!(configured[0].name(), "ready");
    }

    #[test]
    fn test_by_names_preserves_registry_order() {
        let registry = ProviderRegistry::new();
        registry.register(NamedProvider::new("one", true));
        registry.register(NamedProvider::new("two", true));
        registry.register(NamedProvider::new("three", true));

        let picked = registry.by_names(&["three", "one", "nope"]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].name(), "one");
        assert_eq!(picked[1].name(), "three");
    }

    #[test]
    fn test_snapshot_does_not_alias() {
        let registry = ProviderRegistry::new();
        registry.register(NamedProvider::new("one", true));
        let snapshot = registry.all();
        registry.register(NamedProvider::new("two", true));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_catalog_builds_known_kinds() {
        let catalog = ProviderCatalog::with_defaults();
        assert_eq!(catalog.kinds(), vec!["anthropic", "gemini", "ollama", "openai"]);

        let client = reqwest::Client::new();
        let config = ModelConfig::new("ollama", "llama3");
        let provider = catalog
            .build(client, config, CircuitBreakerConfig::default())
            .unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.is_configured());
    }

    #[test]
    fn test_catalog_rejects_unknown_kind() {
        let catalog = ProviderCatalog::with_defaults();
        let result = catalog.build(
            reqwest::Client::new(),
            ModelConfig::new("mystery", "m"),
            CircuitBreakerConfig::default(),
        );
        assert!(matches!(result, Err(ProviderError::UnknownKind(_))));
    }
}
