//! The coordinator between a user context and its object context
//!
//! [`InternalContext`] is implemented by [`LazyInternalContext`](crate::LazyInternalContext),
//! which builds its model and object context on first use, and by
//! [`EagerInternalContext`](crate::EagerInternalContext), which wraps an
//! object context that already exists. Shared state lives in [`ContextBase`];
//! everything that can be expressed through the required methods is provided
//! here once.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use ormkit_connection::{ConnectionStringOrigin, InternalConnection};
use ormkit_core::{
    AppConfig, CompiledModel, ContextType, DbConnection, DbProviderInfo, EntitySetTypePair,
    OrmError, Result,
};
use parking_lot::{Mutex, RwLock};

use crate::{
    ContextServices, DatabaseExistenceState, DatabaseInitializer, DbContext, DbContextInfo,
    ModelBuilder, ObjectContext, SaveOptions,
};

/// Hook run after [`DbContext::on_model_creating`]
pub type OnModelCreating = Arc<dyn Fn(&mut ModelBuilder) -> Result<()> + Send + Sync>;

/// Raises a flag for the lifetime of the guard
pub(crate) struct FlagGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> FlagGuard<'a> {
    pub(crate) fn raise(flag: &'a AtomicBool) -> Self {
        let previous = flag.swap(true, Ordering::SeqCst);
        Self { flag, previous }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

/// A flag raised per thread. Other threads never observe it, so a call that
/// checks it only short-circuits when it re-enters on the raising thread.
#[derive(Default)]
pub(crate) struct ThreadFlag {
    threads: Mutex<HashSet<ThreadId>>,
}

impl ThreadFlag {
    pub(crate) fn is_raised(&self) -> bool {
        self.threads.lock().contains(&thread::current().id())
    }

    pub(crate) fn raise(&self) -> ThreadFlagGuard<'_> {
        let thread = thread::current().id();
        let raised = self.threads.lock().insert(thread);
        ThreadFlagGuard { flag: self, thread, raised }
    }
}

/// Lowers a [`ThreadFlag`] for the raising thread on drop
pub(crate) struct ThreadFlagGuard<'a> {
    flag: &'a ThreadFlag,
    thread: ThreadId,
    raised: bool,
}

impl Drop for ThreadFlagGuard<'_> {
    fn drop(&mut self) {
        if self.raised {
            self.flag.threads.lock().remove(&self.thread);
        }
    }
}

/// State shared by every internal context implementation
pub struct ContextBase {
    owner: Arc<dyn DbContext>,
    context_type: ContextType,
    services: Arc<ContextServices>,
    auto_detect_changes_enabled: AtomicBool,
    validate_on_save_enabled: AtomicBool,
    in_initialization_action: ThreadFlag,
    initializer_disabled: AtomicBool,
    context_info_applied: AtomicBool,
    disposed: AtomicBool,
    default_context_key: RwLock<Option<String>>,
}

impl ContextBase {
    pub fn new(
        owner: Arc<dyn DbContext>,
        context_type: ContextType,
        services: Arc<ContextServices>,
    ) -> Self {
        Self {
            owner,
            context_type,
            services,
            auto_detect_changes_enabled: AtomicBool::new(true),
            validate_on_save_enabled: AtomicBool::new(true),
            in_initialization_action: ThreadFlag::default(),
            initializer_disabled: AtomicBool::new(false),
            context_info_applied: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            default_context_key: RwLock::new(None),
        }
    }

    pub fn owner(&self) -> &Arc<dyn DbContext> {
        &self.owner
    }

    pub fn context_type(&self) -> ContextType {
        self.context_type
    }

    pub fn services(&self) -> &Arc<ContextServices> {
        &self.services
    }

    pub fn auto_detect_changes_enabled(&self) -> bool {
        self.auto_detect_changes_enabled.load(Ordering::SeqCst)
    }

    pub fn set_auto_detect_changes_enabled(&self, enabled: bool) {
        self.auto_detect_changes_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn validate_on_save_enabled(&self) -> bool {
        self.validate_on_save_enabled.load(Ordering::SeqCst)
    }

    pub fn set_validate_on_save_enabled(&self, enabled: bool) {
        self.validate_on_save_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Set while a database initializer on the calling thread creates,
    /// deletes or seeds the database
    pub fn in_initialization_action(&self) -> bool {
        self.in_initialization_action.is_raised()
    }

    pub fn initializer_disabled(&self) -> bool {
        self.initializer_disabled.load(Ordering::SeqCst)
    }

    pub fn set_initializer_disabled(&self, disabled: bool) {
        self.initializer_disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Mark the context disposed. Returns `false` if it already was.
    pub fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub fn check_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(OrmError::ContextDisposed(self.context_type.database_name()));
        }
        Ok(())
    }

    /// Key under which the model hash is stored: the explicit key, or the
    /// dotted context type name
    pub fn default_context_key(&self) -> String {
        self.default_context_key
            .read()
            .clone()
            .unwrap_or_else(|| self.context_type.database_name())
    }

    pub fn set_default_context_key(&self, key: Option<String>) {
        *self.default_context_key.write() = key;
    }
}

impl std::fmt::Debug for ContextBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBase")
            .field("context_type", &self.context_type.database_name())
            .field("auto_detect_changes_enabled", &self.auto_detect_changes_enabled())
            .field("validate_on_save_enabled", &self.validate_on_save_enabled())
            .field("initializer_disabled", &self.initializer_disabled())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Validate and save the tracked changes of `object_context`.
///
/// With validation on, changes are detected (if enabled) before validating,
/// so the save itself does not detect them again.
pub(crate) fn save_object_context_changes(
    base: &ContextBase,
    object_context: &ObjectContext,
) -> Result<usize> {
    let auto_detect = base.auto_detect_changes_enabled();
    let validate = base.validate_on_save_enabled();

    if validate {
        if auto_detect {
            object_context.detect_changes();
        }
        for change in object_context.pending_changes() {
            base.owner().validate_entry(&change)?;
        }
    }

    object_context.save_changes(SaveOptions {
        detect_changes_before_save: auto_detect && !validate,
        accept_all_changes_after_save: true,
    })
}

/// Coordinates a user context with its connection, model and object context
pub trait InternalContext: Send + Sync {
    fn base(&self) -> &ContextBase;

    /// The connection currently in use
    fn internal_connection(&self) -> Arc<dyn InternalConnection>;

    /// The object context, if it has been created
    fn object_context_in_use(&self) -> Option<Arc<ObjectContext>>;

    /// Initialize the context, but not the database, and return the object context
    fn object_context_without_database_initialization(&self) -> Result<Arc<ObjectContext>>;

    /// The code-first model, if the context has one
    fn code_first_model(&self) -> Result<Option<Arc<CompiledModel>>>;

    /// Create the model and object context. Idempotent.
    fn initialize_context(&self) -> Result<()>;

    /// Run the database initializer unless it already ran for this model and
    /// connection in this process
    fn initialize_database(&self) -> Result<()>;

    /// Forget that the database was initialized, so the next initialization runs
    /// the initializer again. Ignored inside an initialization action.
    fn mark_database_not_initialized(&self) -> Result<()>;

    /// Record the database as initialized without running the initializer
    fn mark_database_initialized(&self) -> Result<()>;

    /// Initializer used when none is configured or registered
    fn default_initializer(&self) -> Option<Arc<dyn DatabaseInitializer>>;

    /// Replace the connection before the context is initialized
    fn override_connection(&self, connection: Arc<dyn InternalConnection>) -> Result<()>;

    fn lazy_loading_enabled(&self) -> bool;

    fn set_lazy_loading_enabled(&self, enabled: bool);

    fn proxy_creation_enabled(&self) -> bool;

    fn set_proxy_creation_enabled(&self, enabled: bool);

    /// Release the connection and the object context
    fn dispose_context(&self);

    /// Provider info the model is built for, overriding the connection's
    fn model_provider_info(&self) -> Option<DbProviderInfo> {
        None
    }

    /// Ignored by contexts whose model is fixed
    fn set_model_provider_info(&self, _provider_info: DbProviderInfo) -> Result<()> {
        Ok(())
    }

    /// Ignored by contexts whose model is fixed
    fn set_on_model_creating(&self, _hook: Option<OnModelCreating>) -> Result<()> {
        Ok(())
    }

    /// Validate and save tracked changes
    fn save_changes(&self) -> Result<usize> {
        let object_context = self.object_context()?;
        save_object_context_changes(self.base(), &object_context)
    }

    fn owner(&self) -> &Arc<dyn DbContext> {
        self.base().owner()
    }

    fn context_type(&self) -> ContextType {
        self.base().context_type()
    }

    fn services(&self) -> &Arc<ContextServices> {
        self.base().services()
    }

    fn is_disposed(&self) -> bool {
        self.base().is_disposed()
    }

    fn check_not_disposed(&self) -> Result<()> {
        self.base().check_not_disposed()
    }

    fn app_config(&self) -> Arc<AppConfig> {
        self.internal_connection().app_config()
    }

    fn set_app_config(&self, config: Arc<AppConfig>) {
        self.internal_connection().set_app_config(config);
    }

    fn connection(&self) -> Result<Arc<dyn DbConnection>> {
        self.check_not_disposed()?;
        self.internal_connection().connection()
    }

    fn connection_key(&self) -> Result<String> {
        self.internal_connection().connection_key()
    }

    fn original_connection_string(&self) -> Result<String> {
        self.internal_connection().original_connection_string()
    }

    fn connection_string_origin(&self) -> Result<ConnectionStringOrigin> {
        self.internal_connection().connection_string_origin()
    }

    fn connection_string_name(&self) -> Result<Option<String>> {
        self.internal_connection().connection_string_name()
    }

    fn provider_name(&self) -> Result<String> {
        self.internal_connection().provider_name()
    }

    fn default_schema(&self) -> Result<Option<String>> {
        Ok(self
            .code_first_model()?
            .and_then(|model| model.default_schema().map(str::to_string)))
    }

    fn default_context_key(&self) -> String {
        self.base().default_context_key()
    }

    fn auto_detect_changes_enabled(&self) -> bool {
        self.base().auto_detect_changes_enabled()
    }

    fn set_auto_detect_changes_enabled(&self, enabled: bool) {
        self.base().set_auto_detect_changes_enabled(enabled);
    }

    fn validate_on_save_enabled(&self) -> bool {
        self.base().validate_on_save_enabled()
    }

    fn set_validate_on_save_enabled(&self, enabled: bool) {
        self.base().set_validate_on_save_enabled(enabled);
    }

    /// Initialize the context and then the database
    fn initialize(&self) -> Result<()> {
        self.initialize_context()?;
        self.initialize_database()
    }

    /// The object context, after full initialization
    fn object_context(&self) -> Result<Arc<ObjectContext>> {
        self.initialize()?;
        self.object_context_without_database_initialization()
    }

    /// Run an action that may touch the database on behalf of an initializer.
    ///
    /// Data errors are wrapped in [`OrmError::DatabaseInitialization`]. A
    /// nested action runs as is, so errors are wrapped only once.
    fn perform_initialization_action(
        &self,
        action: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let base = self.base();
        if base.in_initialization_action() {
            return action();
        }

        let result = {
            let _guard = base.in_initialization_action.raise();
            action()
        };

        result.map_err(|error| {
            if error.is_data_error() {
                tracing::error!(error = %error, context = %base.context_type(), "initialization action failed");
                OrmError::DatabaseInitialization(Box::new(error))
            } else {
                error
            }
        })
    }

    /// Apply a [`DbContextInfo`]. Only the first call has an effect; applying
    /// one disables the database initializer.
    fn apply_context_info(&self, info: &DbContextInfo) -> Result<()> {
        let base = self.base();
        if base.context_info_applied.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        base.set_initializer_disabled(true);

        if let Some(config) = info.app_config() {
            self.set_app_config(config.clone());
        }
        if let Some(connection_info) = info.connection_info() {
            let connection = ormkit_connection::LazyInternalConnection::from_connection_info(
                connection_info.clone(),
                self.services().connection_dependencies().clone(),
                self.app_config(),
            );
            self.override_connection(Arc::new(connection))?;
        }
        if let Some(provider_info) = info.model_provider_info() {
            self.set_model_provider_info(provider_info.clone())?;
        }
        if let Some(hook) = info.on_model_creating() {
            self.set_on_model_creating(Some(hook.clone()))?;
        }
        tracing::debug!(context = %base.context_type(), "applied context info");
        Ok(())
    }

    /// The entity set holding `entity_type` and the root type of that set
    fn entity_set_and_base_type_for_type(&self, entity_type: &str) -> Result<EntitySetTypePair> {
        self.initialize()?;
        self.object_context_without_database_initialization()?
            .entity_set_for(entity_type)
    }

    /// Detect changes if automatic detection is on, or if `force` is set
    fn detect_changes(&self, force: bool) -> Result<()> {
        if self.auto_detect_changes_enabled() || force {
            self.object_context()?.detect_changes();
        }
        Ok(())
    }

    fn database_exists(&self) -> Result<bool> {
        self.object_context_without_database_initialization()?
            .database_exists()
    }

    /// Create the database. Fails if it exists.
    fn create_database(&self) -> Result<()> {
        self.create_database_with(DatabaseExistenceState::Unknown)
    }

    /// Create the database, trusting `existence` unless it is unknown
    fn create_database_with(&self, existence: DatabaseExistenceState) -> Result<()> {
        let object_context = self.object_context_without_database_initialization()?;
        if existence == DatabaseExistenceState::Unknown && object_context.database_exists()? {
            return Err(OrmError::DatabaseAlreadyExists(
                object_context.store_connection().database(),
            ));
        }

        self.perform_initialization_action(&mut || {
            object_context.create_database()?;
            self.save_metadata_to_database()
        })?;
        tracing::info!(context = %self.context_type(), "created database");
        Ok(())
    }

    /// Create the database if it does not exist. Returns whether it was created.
    fn create_database_if_not_exists(&self) -> Result<bool> {
        if self.database_exists()? {
            return Ok(false);
        }
        self.create_database_with(DatabaseExistenceState::DoesNotExist)?;
        Ok(true)
    }

    /// Delete the database if it exists. A deleted database is marked not
    /// initialized.
    fn delete_database(&self) -> Result<bool> {
        let object_context = self.object_context_without_database_initialization()?;
        if !object_context.database_exists()? {
            return Ok(false);
        }
        object_context.delete_database()?;
        self.mark_database_not_initialized()?;
        tracing::info!(context = %self.context_type(), "deleted database");
        Ok(true)
    }

    /// The model hash stored in the database for this context, if any
    fn query_for_model_hash(&self) -> Result<Option<String>> {
        self.object_context_without_database_initialization()?
            .read_model_hash(&self.default_context_key())
    }

    /// Record the hash of the code-first model in the database
    fn save_metadata_to_database(&self) -> Result<()> {
        let Some(model) = self.code_first_model()? else {
            return Ok(());
        };
        let object_context = self.object_context_without_database_initialization()?;
        let key = self.default_context_key();
        self.perform_initialization_action(&mut || {
            object_context.write_model_hash(&key, model.hash())
        })
    }

    /// Whether the database was created for the current model.
    ///
    /// Without stored metadata this is an error if `throw_if_no_metadata` is
    /// set and `true` otherwise.
    fn compatible_with_model(&self, throw_if_no_metadata: bool) -> Result<bool> {
        let no_metadata = || {
            if throw_if_no_metadata {
                Err(OrmError::NoModelMetadata(self.context_type().database_name()))
            } else {
                Ok(true)
            }
        };

        let Some(model) = self.code_first_model()? else {
            return no_metadata();
        };
        match self.query_for_model_hash()? {
            Some(stored) => Ok(stored == model.hash()),
            None => no_metadata(),
        }
    }
}

impl dyn InternalContext + '_ {
    /// Resolve the initializer for this context and run it, restoring the
    /// change-tracking flags afterwards
    #[tracing::instrument(skip(self), fields(context = %self.context_type()))]
    pub fn perform_database_initialization(&self) -> Result<()> {
        let initializer = self.services().initializers().resolve(self)?;
        tracing::info!(initializer = initializer.name(), "running database initializer");

        let base = self.base();
        let auto_detect = base.auto_detect_changes_enabled();
        let validate = base.validate_on_save_enabled();

        let result =
            self.perform_initialization_action(&mut || initializer.initialize_database(self));

        base.set_auto_detect_changes_enabled(auto_detect);
        base.set_validate_on_save_enabled(validate);

        if let Err(e) = &result {
            tracing::error!(error = %e, initializer = initializer.name(), "database initialization failed");
        }
        result
    }
}

impl std::fmt::Debug for dyn InternalContext + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalContext")
            .field("context_type", &self.context_type().database_name())
            .field("initialized", &self.object_context_in_use().is_some())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
