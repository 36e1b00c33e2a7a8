//! Process-wide services shared by contexts
//!
//! Every context is created against a [`ContextServices`]. Contexts sharing
//! one share its model cache and its record of initialized databases, so
//! the services are normally created once per process, or taken from
//! [`ContextServices::global`].

use std::sync::{Arc, OnceLock};

use ormkit_connection::{ConnectionDependencies, ConnectionFactory};
use ormkit_core::AppConfig;
use ormkit_providers::ProviderRegistry;

use crate::{
    ChangeProcessor, ConventionModelPipeline, DefaultModelCacheKeyFactory, InitializationRegistry,
    InitializerResolver, ModelCache, ModelCacheKeyFactory, ModelPipeline, ProviderChangeProcessor,
};

static GLOBAL_SERVICES: OnceLock<Arc<ContextServices>> = OnceLock::new();

/// Registries, caches and extension points used by contexts
pub struct ContextServices {
    providers: Arc<ProviderRegistry>,
    connection_dependencies: ConnectionDependencies,
    model_cache: ModelCache,
    initialized_databases: InitializationRegistry,
    initializers: InitializerResolver,
    pipeline: Arc<dyn ModelPipeline>,
    cache_key_factory: Arc<dyn ModelCacheKeyFactory>,
    change_processor: Arc<dyn ChangeProcessor>,
    app_config: Arc<AppConfig>,
}

impl ContextServices {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            connection_dependencies: ConnectionDependencies::new(providers.clone()),
            model_cache: ModelCache::new(),
            initialized_databases: InitializationRegistry::new(),
            initializers: InitializerResolver::new(),
            pipeline: Arc::new(ConventionModelPipeline::new()),
            cache_key_factory: Arc::new(DefaultModelCacheKeyFactory),
            change_processor: Arc::new(ProviderChangeProcessor::new(providers.clone())),
            app_config: Arc::new(AppConfig::default()),
            providers,
        }
    }

    /// Services shared by the whole process, with the built-in providers and
    /// an empty config
    pub fn global() -> Arc<ContextServices> {
        GLOBAL_SERVICES
            .get_or_init(|| {
                tracing::debug!("creating global context services");
                Arc::new(ContextServices::new(Arc::new(ProviderRegistry::with_defaults())))
            })
            .clone()
    }

    /// Config given to contexts created by name or connection string
    pub fn with_app_config(mut self, config: AppConfig) -> Self {
        self.app_config = Arc::new(config);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Arc<dyn ModelPipeline>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_cache_key_factory(mut self, factory: Arc<dyn ModelCacheKeyFactory>) -> Self {
        self.cache_key_factory = factory;
        self
    }

    pub fn with_change_processor(mut self, processor: Arc<dyn ChangeProcessor>) -> Self {
        self.change_processor = processor;
        self
    }

    /// Connection factory for names that are not in the config
    pub fn with_default_connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.connection_dependencies = self
            .connection_dependencies
            .with_default_connection_factory(factory);
        self
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn connection_dependencies(&self) -> &ConnectionDependencies {
        &self.connection_dependencies
    }

    pub fn model_cache(&self) -> &ModelCache {
        &self.model_cache
    }

    pub fn initialized_databases(&self) -> &InitializationRegistry {
        &self.initialized_databases
    }

    pub fn initializers(&self) -> &InitializerResolver {
        &self.initializers
    }

    pub fn pipeline(&self) -> &Arc<dyn ModelPipeline> {
        &self.pipeline
    }

    pub fn cache_key_factory(&self) -> &Arc<dyn ModelCacheKeyFactory> {
        &self.cache_key_factory
    }

    pub fn change_processor(&self) -> &Arc<dyn ChangeProcessor> {
        &self.change_processor
    }

    pub fn app_config(&self) -> &Arc<AppConfig> {
        &self.app_config
    }
}

impl Default for ContextServices {
    fn default() -> Self {
        Self::new(Arc::new(ProviderRegistry::with_defaults()))
    }
}

impl std::fmt::Debug for ContextServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextServices")
            .field("providers", &self.providers.list())
            .field("model_cache", &self.model_cache)
            .field("initialized_databases", &self.initialized_databases)
            .field("initializers", &self.initializers)
            .finish_non_exhaustive()
    }
}
