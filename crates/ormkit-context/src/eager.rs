//! Internal context over an object context that already exists

use std::sync::Arc;

use ormkit_connection::{EagerInternalConnection, InternalConnection};
use ormkit_core::{CompiledModel, ContextType, OrmError, Result};

use crate::{
    ContextBase, ContextServices, DatabaseInitializer, DbContext, InternalContext, ObjectContext,
};

/// Wraps a caller-supplied [`ObjectContext`].
///
/// The context is initialized from the start and never runs a database
/// initializer. Its connection is the object context's connection, borrowed;
/// with `owned` set, disposing the context disposes the object context.
pub struct EagerInternalContext {
    base: ContextBase,
    object_context: Arc<ObjectContext>,
    owned: bool,
    internal_connection: Arc<dyn InternalConnection>,
}

impl EagerInternalContext {
    pub fn new<C: DbContext>(
        owner: Arc<C>,
        object_context: Arc<ObjectContext>,
        owned: bool,
        services: Arc<ContextServices>,
    ) -> Self {
        let internal_connection = Arc::new(EagerInternalConnection::new(
            object_context.connection().clone(),
            false,
            services.app_config().clone(),
        ));
        let context_type = ContextType::of::<C>();
        tracing::debug!(context = %context_type, owned, "created eager context");
        Self {
            base: ContextBase::new(owner, context_type, services),
            object_context,
            owned,
            internal_connection,
        }
    }

    pub fn is_object_context_owned(&self) -> bool {
        self.owned
    }
}

impl InternalContext for EagerInternalContext {
    fn base(&self) -> &ContextBase {
        &self.base
    }

    fn internal_connection(&self) -> Arc<dyn InternalConnection> {
        self.internal_connection.clone()
    }

    fn object_context_in_use(&self) -> Option<Arc<ObjectContext>> {
        Some(self.object_context.clone())
    }

    fn object_context_without_database_initialization(&self) -> Result<Arc<ObjectContext>> {
        self.check_not_disposed()?;
        Ok(self.object_context.clone())
    }

    fn code_first_model(&self) -> Result<Option<Arc<CompiledModel>>> {
        Ok(None)
    }

    fn initialize_context(&self) -> Result<()> {
        self.check_not_disposed()
    }

    fn initialize_database(&self) -> Result<()> {
        Ok(())
    }

    fn mark_database_not_initialized(&self) -> Result<()> {
        Ok(())
    }

    fn mark_database_initialized(&self) -> Result<()> {
        Ok(())
    }

    fn default_initializer(&self) -> Option<Arc<dyn DatabaseInitializer>> {
        None
    }

    fn override_connection(&self, _connection: Arc<dyn InternalConnection>) -> Result<()> {
        Err(OrmError::ConnectionReplacedAfterInitialization(
            self.context_type().database_name(),
        ))
    }

    fn lazy_loading_enabled(&self) -> bool {
        self.object_context.options().lazy_loading_enabled
    }

    fn set_lazy_loading_enabled(&self, enabled: bool) {
        self.object_context.set_lazy_loading_enabled(enabled);
    }

    fn proxy_creation_enabled(&self) -> bool {
        self.object_context.options().proxy_creation_enabled
    }

    fn set_proxy_creation_enabled(&self, enabled: bool) {
        self.object_context.set_proxy_creation_enabled(enabled);
    }

    fn dispose_context(&self) {
        if !self.base.mark_disposed() {
            return;
        }
        if self.owned {
            self.object_context.dispose();
        }
        tracing::debug!(context = %self.context_type(), owned = self.owned, "disposed eager context");
    }
}

impl std::fmt::Debug for EagerInternalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EagerInternalContext")
            .field("context_type", &self.context_type().database_name())
            .field("object_context", &self.object_context)
            .field("owned", &self.owned)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
