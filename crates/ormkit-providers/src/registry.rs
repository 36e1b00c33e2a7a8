//! Provider registry for managing available providers

use std::collections::HashMap;
use std::sync::Arc;

use ormkit_core::{DbConnection, OrmError, ProviderFactory, ProviderServices, Result};

/// Registry of available providers, keyed case-insensitively by invariant name
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Create a registry with all built-in providers registered
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::sqlite::SqliteProviderFactory::new()));

        registry
    }

    /// Register a provider, replacing any provider with the same invariant name
    pub fn register(&mut self, provider: Arc<dyn ProviderFactory>) {
        let name = provider.invariant_name().to_string();
        tracing::info!(provider = %name, "registering provider");
        self.providers.insert(name.to_lowercase(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn ProviderFactory>) -> Self {
        self.register(provider);
        self
    }

    /// Get a provider by invariant name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderFactory>> {
        let provider = self.providers.get(&name.to_lowercase()).cloned();
        if provider.is_none() {
            tracing::warn!(provider = %name, "provider not found in registry");
        }
        provider
    }

    /// Get a provider by invariant name, failing with [`OrmError::ProviderNotFound`]
    pub fn require(&self, name: &str) -> Result<Arc<dyn ProviderFactory>> {
        self.get(name)
            .ok_or_else(|| OrmError::ProviderNotFound(name.to_string()))
    }

    /// Create a closed connection from a provider
    pub fn create_connection(&self, name: &str) -> Result<Arc<dyn DbConnection>> {
        self.require(name)?.create_connection()
    }

    /// Store services of a provider
    pub fn services(&self, name: &str) -> Result<Arc<dyn ProviderServices>> {
        Ok(self.require(name)?.services())
    }

    /// List all registered invariant names
    pub fn list(&self) -> Vec<&str> {
        self.providers.values().map(|p| p.invariant_name()).collect()
    }

    /// Check if a provider is registered
    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(&name.to_lowercase())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.list())
            .finish()
    }
}
