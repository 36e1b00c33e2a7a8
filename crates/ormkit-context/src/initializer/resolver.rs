//! Choosing the initializer for a context

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ormkit_core::{AppConfig, ContextType, DISABLED_INITIALIZER, OrmError, Result};
use parking_lot::RwLock;

use super::{
    CREATE_DATABASE_IF_NOT_EXISTS, CreateDatabaseIfNotExists, DROP_CREATE_DATABASE_ALWAYS,
    DROP_CREATE_DATABASE_IF_MODEL_CHANGES, DatabaseInitializer, DropCreateDatabaseAlways,
    DropCreateDatabaseIfModelChanges, NULL_INITIALIZER, NullDatabaseInitializer,
};
use crate::InternalContext;

/// Creates an initializer from a name found in the config
pub type InitializerFactory = Arc<dyn Fn() -> Arc<dyn DatabaseInitializer> + Send + Sync>;

/// Picks the initializer for a context.
///
/// Precedence, first match wins:
///
/// 1. a suppressed context type, or a context whose initializer was
///    disabled by a `DbContextInfo`, gets the null initializer
/// 2. the `contexts` section of the app config
/// 3. the legacy `DatabaseInitializerForType <type>` app setting
/// 4. an initializer registered in code for the context type
/// 5. the context's default initializer
/// 6. the null initializer
#[derive(Default)]
pub struct InitializerResolver {
    registered: RwLock<HashMap<ContextType, Arc<dyn DatabaseInitializer>>>,
    suppressed: RwLock<HashSet<ContextType>>,
    named: RwLock<HashMap<String, InitializerFactory>>,
}

fn named_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

impl InitializerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the initializer for a context type, replacing any earlier one
    pub fn set_initializer(&self, context_type: ContextType, initializer: Arc<dyn DatabaseInitializer>) {
        tracing::debug!(context = %context_type, initializer = initializer.name(), "registered initializer");
        self.registered.write().insert(context_type, initializer);
    }

    /// Register the null initializer for a context type
    pub fn disable_initializer(&self, context_type: ContextType) {
        self.set_initializer(context_type, Arc::new(NullDatabaseInitializer));
    }

    /// Turn initialization off for a context type, whatever the config says
    pub fn suppress(&self, context_type: ContextType) {
        self.suppressed.write().insert(context_type);
    }

    pub fn unsuppress(&self, context_type: ContextType) {
        self.suppressed.write().remove(&context_type);
    }

    pub fn is_suppressed(&self, context_type: ContextType) -> bool {
        self.suppressed.read().contains(&context_type)
    }

    /// Make a custom initializer available by name to the config. Names are
    /// matched ignoring case and surrounding whitespace.
    pub fn register_named(&self, name: impl AsRef<str>, factory: InitializerFactory) {
        self.named.write().insert(named_key(name.as_ref()), factory);
    }

    /// Create an initializer from its config name
    pub fn by_name(&self, name: &str) -> Result<Arc<dyn DatabaseInitializer>> {
        let name = name.trim();
        // The factory runs after the lock is released; it may register more names.
        let factory = self.named.read().get(&named_key(name)).cloned();
        if let Some(factory) = factory {
            return Ok(factory());
        }

        let initializer: Arc<dyn DatabaseInitializer> = if name.eq_ignore_ascii_case(DISABLED_INITIALIZER)
            || name.eq_ignore_ascii_case(NULL_INITIALIZER)
        {
            Arc::new(NullDatabaseInitializer)
        } else if name.eq_ignore_ascii_case(CREATE_DATABASE_IF_NOT_EXISTS) {
            Arc::new(CreateDatabaseIfNotExists::new())
        } else if name.eq_ignore_ascii_case(DROP_CREATE_DATABASE_ALWAYS) {
            Arc::new(DropCreateDatabaseAlways::new())
        } else if name.eq_ignore_ascii_case(DROP_CREATE_DATABASE_IF_MODEL_CHANGES) {
            Arc::new(DropCreateDatabaseIfModelChanges::new())
        } else {
            return Err(OrmError::UnknownInitializer(name.to_string()));
        };
        Ok(initializer)
    }

    /// Initializer configured for a context type, if the config names one
    fn from_config(
        &self,
        config: &AppConfig,
        context_type: ContextType,
    ) -> Result<Option<Arc<dyn DatabaseInitializer>>> {
        let type_name = context_type.database_name();

        if let Some(settings) = config.context_settings(&type_name) {
            if settings.disable_database_initialization {
                return Ok(Some(Arc::new(NullDatabaseInitializer)));
            }
            if let Some(name) = settings
                .database_initializer
                .as_deref()
                .filter(|name| !name.trim().is_empty())
            {
                return self.by_name(name).map(Some);
            }
        }

        match config.legacy_initializer(&type_name) {
            Some(name) => self.by_name(name).map(Some),
            None => Ok(None),
        }
    }

    /// Resolve the initializer for `context`
    pub fn resolve(&self, context: &dyn InternalContext) -> Result<Arc<dyn DatabaseInitializer>> {
        let context_type = context.context_type();

        if context.base().initializer_disabled() || self.is_suppressed(context_type) {
            return Ok(Arc::new(NullDatabaseInitializer));
        }

        if let Some(initializer) = self.from_config(&context.app_config(), context_type)? {
            return Ok(initializer);
        }

        if let Some(initializer) = self.registered.read().get(&context_type) {
            return Ok(initializer.clone());
        }

        Ok(context
            .default_initializer()
            .unwrap_or_else(|| Arc::new(NullDatabaseInitializer)))
    }
}

impl std::fmt::Debug for InitializerResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializerResolver")
            .field("registered", &self.registered.read().len())
            .field("suppressed", &self.suppressed.read().len())
            .field("named", &self.named.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
