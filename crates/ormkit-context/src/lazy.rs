//! Internal context that builds its model and object context on first use

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ormkit_connection::{EagerInternalConnection, InternalConnection, LazyInternalConnection};
use ormkit_core::{CompiledModel, ContextType, DbConnection, DbProviderInfo, OrmError, Result};
use parking_lot::{ReentrantMutex, RwLock};

use crate::caches::{InitializationAction, ModelFactory};
use crate::internal::{FlagGuard, ThreadFlag, save_object_context_changes};
use crate::model_builder::strip_invalid_characters;
use crate::{
    ContextBase, ContextServices, CreateDatabaseIfNotExists, DatabaseInitializer, DbContext,
    InitializationKey, InternalContext, ModelBuilder, ObjectContext, OnModelCreating,
};

/// An internal context created from a name, a connection string, a
/// connection or a compiled model.
///
/// Nothing is resolved at construction. The first operation that needs the
/// object context picks the model source:
///
/// - the compiled model the context was created with
/// - the model metadata carried by the connection
/// - the process-wide model cache, which builds one model per cache key
///
/// Lazy-loading and proxy-creation flags set before that point are kept and
/// applied to the object context once it exists.
pub struct LazyInternalContext {
    base: ContextBase,
    internal_connection: RwLock<Arc<dyn InternalConnection>>,
    supplied_model: Option<Arc<CompiledModel>>,
    model: RwLock<Option<Arc<CompiledModel>>>,
    object_context: RwLock<Option<Arc<ObjectContext>>>,
    init_lock: ReentrantMutex<()>,
    creating_model: AtomicBool,
    in_database_initialization: ThreadFlag,
    initial_lazy_loading: AtomicBool,
    initial_proxy_creation: AtomicBool,
    model_provider_info: RwLock<Option<DbProviderInfo>>,
    on_model_creating: RwLock<Option<OnModelCreating>>,
}

impl LazyInternalContext {
    /// A context whose connection is resolved from a config name or a
    /// connection string
    pub fn new<C: DbContext>(
        owner: Arc<C>,
        name_or_connection_string: &str,
        services: Arc<ContextServices>,
    ) -> Self {
        let connection = LazyInternalConnection::new(
            name_or_connection_string,
            services.connection_dependencies().clone(),
            services.app_config().clone(),
        );
        Self::with_connection(owner, Arc::new(connection), None, services)
    }

    /// A context connected by convention: the connection name is the dotted
    /// name of the context type
    pub fn for_context<C: DbContext>(owner: Arc<C>, services: Arc<ContextServices>) -> Self {
        let name = ContextType::of::<C>().database_name();
        Self::new(owner, &name, services)
    }

    /// A context that uses `model` instead of building one
    pub fn with_model<C: DbContext>(
        owner: Arc<C>,
        name_or_connection_string: &str,
        model: Arc<CompiledModel>,
        services: Arc<ContextServices>,
    ) -> Self {
        let connection = LazyInternalConnection::new(
            name_or_connection_string,
            services.connection_dependencies().clone(),
            services.app_config().clone(),
        );
        Self::with_connection(owner, Arc::new(connection), Some(model), services)
    }

    /// A context over a connection the caller already has. With `owned` set
    /// the connection is disposed with the context.
    pub fn with_existing_connection<C: DbContext>(
        owner: Arc<C>,
        connection: Arc<dyn DbConnection>,
        owned: bool,
        model: Option<Arc<CompiledModel>>,
        services: Arc<ContextServices>,
    ) -> Self {
        let connection =
            EagerInternalConnection::new(connection, owned, services.app_config().clone());
        Self::with_connection(owner, Arc::new(connection), model, services)
    }

    pub fn with_connection<C: DbContext>(
        owner: Arc<C>,
        connection: Arc<dyn InternalConnection>,
        model: Option<Arc<CompiledModel>>,
        services: Arc<ContextServices>,
    ) -> Self {
        let context_type = ContextType::of::<C>();
        tracing::debug!(context = %context_type, has_model = model.is_some(), "created lazy context");
        Self {
            base: ContextBase::new(owner, context_type, services),
            internal_connection: RwLock::new(connection),
            model: RwLock::new(model.clone()),
            supplied_model: model,
            object_context: RwLock::new(None),
            init_lock: ReentrantMutex::new(()),
            creating_model: AtomicBool::new(false),
            in_database_initialization: ThreadFlag::default(),
            initial_lazy_loading: AtomicBool::new(true),
            initial_proxy_creation: AtomicBool::new(true),
            model_provider_info: RwLock::new(None),
            on_model_creating: RwLock::new(None),
        }
    }

    /// Whether the model and object context have been created
    pub fn is_context_initialized(&self) -> bool {
        self.object_context.read().is_some()
    }

    /// Build the model for `context`. Runs at most once successfully per
    /// model cache key.
    #[tracing::instrument(skip(context), fields(context = %context.base.context_type()))]
    pub fn create_model(context: &LazyInternalContext) -> Result<Arc<CompiledModel>> {
        let provider_info = match context.model_provider_info() {
            Some(provider_info) => provider_info,
            None => context.connection_provider_info()?,
        };
        let builder = context.create_model_builder()?;

        let model = context
            .services()
            .pipeline()
            .build(builder, provider_info)
            .inspect_err(|e| tracing::error!(error = %e, "model build failed"))?;

        tracing::info!(
            model = %model.id(),
            provider = %model.provider_info().provider_invariant_name,
            "built model"
        );
        Ok(Arc::new(model))
    }

    /// A builder with the namespace and container conventions applied and the
    /// owner's and the custom model hooks run
    pub fn create_model_builder(&self) -> Result<ModelBuilder> {
        let context_type = self.context_type();
        let mut builder = ModelBuilder::new();

        if let Some(namespace) = context_type.namespace() {
            let namespace = strip_invalid_characters(&namespace);
            if !namespace.trim().is_empty() {
                builder.set_namespace(namespace);
            }
        }
        let container = strip_invalid_characters(context_type.name());
        if !container.trim().is_empty() {
            builder.set_container_name(container);
        }

        self.owner().on_model_creating(&mut builder)?;
        let hook = self.on_model_creating.read().clone();
        if let Some(hook) = hook {
            hook(&mut builder)?;
        }
        Ok(builder)
    }

    /// Key of this context's entry in the initialized-database registry
    pub fn initialization_key(&self) -> Result<InitializationKey> {
        let model = self.model.read().as_ref().map(|model| model.id());
        Ok(InitializationKey::new(
            model,
            self.internal_connection().connection_key()?,
        ))
    }

    fn connection_provider_info(&self) -> Result<DbProviderInfo> {
        let connection = self.connection()?;
        let store = connection.store_connection().unwrap_or_else(|| connection.clone());
        let provider = store.provider_invariant_name().to_string();
        let services = self.services().providers().services(&provider)?;
        let token = services.manifest_token(store.as_ref())?;
        Ok(DbProviderInfo::new(provider, token))
    }

    fn context_name(&self) -> String {
        self.context_type().database_name()
    }

    fn ensure_object_context(&self) -> Result<Arc<ObjectContext>> {
        self.check_not_disposed()?;
        if let Some(object_context) = self.object_context.read().clone() {
            return Ok(object_context);
        }

        let _lock = self.init_lock.lock();
        if let Some(object_context) = self.object_context.read().clone() {
            return Ok(object_context);
        }
        if self.creating_model.load(Ordering::SeqCst) {
            return Err(OrmError::ContextUsedInModelCreating(self.context_name()));
        }

        let _creating = FlagGuard::raise(&self.creating_model);
        let (model, object_context) = self.create_object_context()?;

        object_context.set_lazy_loading_enabled(self.initial_lazy_loading.load(Ordering::SeqCst));
        object_context.set_proxy_creation_enabled(self.initial_proxy_creation.load(Ordering::SeqCst));
        object_context.set_use_consistent_null_reference_behavior(true);

        let object_context = Arc::new(object_context);
        if model.is_some() {
            *self.model.write() = model;
        }
        *self.object_context.write() = Some(object_context.clone());
        Ok(object_context)
    }

    #[tracing::instrument(skip(self), fields(context = %self.base.context_type()))]
    fn create_object_context(&self) -> Result<(Option<Arc<CompiledModel>>, ObjectContext)> {
        let services = self.services().clone();
        let connection = self.internal_connection();

        if let Some(model) = &self.supplied_model {
            if connection.connection_has_model()? {
                return Err(OrmError::ConnectionHasModel(self.context_name()));
            }
            let object_context = ObjectContext::for_model(
                model.clone(),
                connection.connection()?,
                services.providers(),
                services.change_processor().clone(),
            )?;
            tracing::debug!("created object context from the supplied model");
            return Ok((Some(model.clone()), object_context));
        }

        if connection.connection_has_model()? {
            let object_context = ObjectContext::from_connection_model(
                connection.connection()?,
                services.providers(),
                services.change_processor().clone(),
            )?;
            tracing::debug!("created object context from the connection's model");
            return Ok((None, object_context));
        }

        let key = services.cache_key_factory().create(self)?;
        let model = services
            .model_cache()
            .get_or_add(key, || ModelFactory::new(Self::create_model))
            .get_value(self)?;
        let object_context = ObjectContext::for_model(
            model.clone(),
            connection.connection()?,
            services.providers(),
            services.change_processor().clone(),
        )?;
        Ok((Some(model), object_context))
    }

    fn initialize_database_action(
        &self,
        action: impl FnOnce() -> InitializationAction,
    ) -> Result<()> {
        if self.in_database_initialization.is_raised() {
            return Ok(());
        }
        let _guard = self.in_database_initialization.raise();

        let key = self.initialization_key()?;
        self.services()
            .initialized_databases()
            .get_or_add(key, action)
            .perform_action(self)
    }
}

impl InternalContext for LazyInternalContext {
    fn base(&self) -> &ContextBase {
        &self.base
    }

    fn internal_connection(&self) -> Arc<dyn InternalConnection> {
        self.internal_connection.read().clone()
    }

    fn object_context_in_use(&self) -> Option<Arc<ObjectContext>> {
        self.object_context.read().clone()
    }

    fn object_context_without_database_initialization(&self) -> Result<Arc<ObjectContext>> {
        self.ensure_object_context()
    }

    /// The model the context was built with. Initializes the context.
    fn code_first_model(&self) -> Result<Option<Arc<CompiledModel>>> {
        self.initialize_context()?;
        Ok(self.model.read().clone())
    }

    fn initialize_context(&self) -> Result<()> {
        self.ensure_object_context().map(|_| ())
    }

    fn initialize_database(&self) -> Result<()> {
        self.initialize_database_action(|| {
            InitializationAction::new(|context| context.perform_database_initialization())
        })
    }

    fn mark_database_not_initialized(&self) -> Result<()> {
        if self.base.in_initialization_action() {
            return Ok(());
        }
        let key = self.initialization_key()?;
        self.services().initialized_databases().remove(&key);
        Ok(())
    }

    fn mark_database_initialized(&self) -> Result<()> {
        self.initialize_context()?;
        self.initialize_database_action(|| InitializationAction::new(|_| Ok(())))
    }

    fn default_initializer(&self) -> Option<Arc<dyn DatabaseInitializer>> {
        self.model
            .read()
            .as_ref()
            .map(|_| Arc::new(CreateDatabaseIfNotExists::new()) as Arc<dyn DatabaseInitializer>)
    }

    fn override_connection(&self, connection: Arc<dyn InternalConnection>) -> Result<()> {
        self.check_not_disposed()?;
        if self.object_context.read().is_some() || self.creating_model.load(Ordering::SeqCst) {
            return Err(OrmError::ConnectionReplacedAfterInitialization(self.context_name()));
        }

        connection.set_app_config(self.app_config());

        let current = self.internal_connection();
        let current_has_model = current.connection_has_model()?;
        if connection.connection_has_model()? != current_has_model {
            return Err(if current_has_model {
                OrmError::CannotReplaceEntityConnectionWithStoreConnection
            } else {
                OrmError::CannotReplaceStoreConnectionWithEntityConnection
            });
        }

        if let Some(provider_info) = self.model_provider_info.read().as_ref() {
            connection.set_provider_name(Some(provider_info.provider_invariant_name.clone()));
        }

        current.dispose();
        *self.internal_connection.write() = connection;
        tracing::debug!(context = %self.context_type(), "connection overridden");
        Ok(())
    }

    fn lazy_loading_enabled(&self) -> bool {
        match self.object_context.read().as_ref() {
            Some(object_context) => object_context.options().lazy_loading_enabled,
            None => self.initial_lazy_loading.load(Ordering::SeqCst),
        }
    }

    fn set_lazy_loading_enabled(&self, enabled: bool) {
        match self.object_context.read().as_ref() {
            Some(object_context) => object_context.set_lazy_loading_enabled(enabled),
            None => self.initial_lazy_loading.store(enabled, Ordering::SeqCst),
        }
    }

    fn proxy_creation_enabled(&self) -> bool {
        match self.object_context.read().as_ref() {
            Some(object_context) => object_context.options().proxy_creation_enabled,
            None => self.initial_proxy_creation.load(Ordering::SeqCst),
        }
    }

    fn set_proxy_creation_enabled(&self, enabled: bool) {
        match self.object_context.read().as_ref() {
            Some(object_context) => object_context.set_proxy_creation_enabled(enabled),
            None => self.initial_proxy_creation.store(enabled, Ordering::SeqCst),
        }
    }

    fn dispose_context(&self) {
        if !self.base.mark_disposed() {
            return;
        }
        self.internal_connection().dispose();
        if let Some(object_context) = self.object_context.read().as_ref() {
            object_context.dispose();
        }
        tracing::debug!(context = %self.context_type(), "disposed lazy context");
    }

    fn model_provider_info(&self) -> Option<DbProviderInfo> {
        self.model_provider_info.read().clone()
    }

    fn set_model_provider_info(&self, provider_info: DbProviderInfo) -> Result<()> {
        self.check_not_disposed()?;
        self.internal_connection()
            .set_provider_name(Some(provider_info.provider_invariant_name.clone()));
        *self.model_provider_info.write() = Some(provider_info);
        Ok(())
    }

    fn set_on_model_creating(&self, hook: Option<OnModelCreating>) -> Result<()> {
        self.check_not_disposed()?;
        *self.on_model_creating.write() = hook;
        Ok(())
    }

    /// Saves nothing until the object context exists
    fn save_changes(&self) -> Result<usize> {
        self.check_not_disposed()?;
        if self.object_context_in_use().is_none() {
            return Ok(0);
        }
        let object_context = self.object_context()?;
        save_object_context_changes(&self.base, &object_context)
    }
}

impl std::fmt::Debug for LazyInternalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyInternalContext")
            .field("context_type", &self.context_type().database_name())
            .field("initialized", &self.is_context_initialized())
            .field("model", &self.model.read().as_ref().map(|model| model.id()))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests;
