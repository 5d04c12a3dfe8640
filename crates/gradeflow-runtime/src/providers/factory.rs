//! Provider factories, keyed by [`ProviderKind`].
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let config = ProviderConfig::new(ProviderKind::Ollama);
//! let provider = registry.create(&config)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{GradingProvider, ProviderConfig, ProviderKind};
use crate::config::ConfigError;

/// Creates providers of one kind from a [`ProviderConfig`].
pub trait ProviderFactory: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Create a provider. Implementations validate first.
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn GradingProvider>, ConfigError>;

    /// Validate a config without creating a provider.
    fn validate_config(&self, config: &ProviderConfig) -> Result<(), ConfigError> {
        if config.kind != self.kind() {
            return Err(ConfigError::Invalid(format!(
                "factory for '{}' cannot build '{}'",
                self.kind(),
                config.kind
            )));
        }
        config.validate()
    }

    fn description(&self) -> &'static str {
        "Grading provider"
    }
}

/// Registry of available provider factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<ProviderKind, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any existing one for its kind.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    /// Create a provider for `config.kind`.
    pub fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn GradingProvider>, ConfigError> {
        self.factory_for(config.kind)?.create(config)
    }

    pub fn validate(&self, config: &ProviderConfig) -> Result<(), ConfigError> {
        self.factory_for(config.kind)?.validate_config(config)
    }

    /// Kinds with a registered factory.
    pub fn available_kinds(&self) -> Vec<ProviderKind> {
        self.factories.keys().copied().collect()
    }

    pub fn has_provider(&self, kind: ProviderKind) -> bool {
        self.factories.contains_key(&kind)
    }

    fn factory_for(&self, kind: ProviderKind) -> Result<&Arc<dyn ProviderFactory>, ConfigError> {
        self.factories.get(&kind).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "provider '{}' is not available in this build. Available: {:?}",
                kind,
                self.available_kinds()
                    .iter()
                    .map(ProviderKind::as_str)
                    .collect::<Vec<_>>()
            ))
        })
    }

    /// Registry with every adapter compiled into this build.
    #[allow(unused_mut)]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiCompatibleFactory::new(
            ProviderKind::OpenAi,
        )));

        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));

        #[cfg(feature = "gemini")]
        registry.register(Arc::new(super::GeminiProviderFactory));

        #[cfg(feature = "local")]
        {
            registry.register(Arc::new(super::OllamaProviderFactory));
            registry.register(Arc::new(super::OpenAiCompatibleFactory::new(
                ProviderKind::LmStudio,
            )));
            registry.register(Arc::new(super::OpenAiCompatibleFactory::new(
                ProviderKind::Generic,
            )));
        }

        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderError, RawResponse};
    use async_trait::async_trait;
    use gradeflow_core::GradingRequest;

    struct MockProvider;

    #[async_trait]
    impl GradingProvider for MockProvider {
        async fn grade(
            &self,
            _request: &GradingRequest,
            _config: &ProviderConfig,
        ) -> Result<RawResponse, ProviderError> {
            Ok(RawResponse::new(r#"{"score": 1}"#))
        }

        async fn test_connection(&self, _config: &ProviderConfig) -> Result<(), ProviderError> {
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    struct MockFactory;

    impl ProviderFactory for MockFactory {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Ollama
        }

        fn create(
            &self,
            config: &ProviderConfig,
        ) -> Result<Arc<dyn GradingProvider>, ConfigError> {
            self.validate_config(config)?;
            Ok(Arc::new(MockProvider))
        }
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockFactory));

        assert!(registry.has_provider(ProviderKind::Ollama));
        assert!(!registry.has_provider(ProviderKind::Gemini));
        assert_eq!(registry.available_kinds(), vec![ProviderKind::Ollama]);

        let provider = registry
            .create(&ProviderConfig::new(ProviderKind::Ollama))
            .unwrap();
        assert_eq!(provider.name(), "mock");
    }

    #[test]
    fn test_unknown_kind() {
        let registry = ProviderRegistry::new();
        let err = registry
            .create(&ProviderConfig::new(ProviderKind::Gemini))
            .err()
            .unwrap();
        assert!(err.to_string().contains("not available"));
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockFactory));

        let config = ProviderConfig::new(ProviderKind::Ollama).with_endpoint("ftp://nope");
        assert!(registry.validate(&config).is_err());
        assert!(registry.create(&config).is_err());
    }
}
