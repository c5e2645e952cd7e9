//! Provider selection by configuration string.
//!
//! [`ProviderRegistry`] maps a name (`"anthropic"`, `"openai"`) to a
//! constructor. Sessions call [`ProviderRegistry::create`] once at
//! construction; an unknown name or an unconfigured provider is a
//! configuration error.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};
use vigil_settings::ProviderSettings;

use crate::anthropic::{AnthropicConfig, AnthropicProvider};
use crate::openai::{OpenAiConfig, OpenAiProvider};
use crate::provider::{Provider, ProviderError, ProviderResult};

/// Builds a provider from the provider settings block.
pub type ProviderConstructor =
    Box<dyn Fn(&ProviderSettings) -> ProviderResult<Arc<dyn Provider>> + Send + Sync>;

/// Name → constructor table.
pub struct ProviderRegistry {
    constructors: BTreeMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the built-in providers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("anthropic", |settings: &ProviderSettings| {
            let provider = AnthropicProvider::new(AnthropicConfig::from_endpoint(&settings.anthropic))?;
            Ok(Arc::new(provider) as Arc<dyn Provider>)
        });
        registry.register("openai", |settings: &ProviderSettings| {
            let provider = OpenAiProvider::new(OpenAiConfig::from_endpoint(&settings.openai))?;
            Ok(Arc::new(provider) as Arc<dyn Provider>)
        });
        registry
    }

    /// Register (or replace) a constructor.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&ProviderSettings) -> ProviderResult<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        if self
            .constructors
            .insert(name.to_owned(), Box::new(constructor))
            .is_some()
        {
            debug!(provider = name, "replaced provider constructor");
        }
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Create the provider registered under `name`.
    pub fn create(&self, name: &str, settings: &ProviderSettings) -> ProviderResult<Arc<dyn Provider>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider {
                name: name.to_owned(),
            })?;
        let provider = constructor(settings)?;
        if !provider.is_available() {
            warn!(provider = name, "provider is not configured");
            return Err(ProviderError::Unavailable {
                provider: name.to_owned(),
                reason: "missing API key or model".into(),
            });
        }
        debug!(provider = name, model = provider.model(), "provider created");
        Ok(provider)
    }

    /// Create the provider named by `settings.default`.
    pub fn create_default(&self, settings: &ProviderSettings) -> ProviderResult<Arc<dyn Provider>> {
        self.create(&settings.default_provider, settings)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
