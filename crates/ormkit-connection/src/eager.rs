//! Connections supplied by the caller

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ormkit_core::{AppConfig, DbConnection, OrmError, Result};
use parking_lot::{Mutex, RwLock};

use crate::internal::{self, ConnectionLifecycle, ConnectionSnapshot, ConnectionStringOrigin};
use crate::InternalConnection;

/// Wraps an existing connection. It is ready from the start and its
/// origin is always [`ConnectionStringOrigin::UserCode`].
///
/// When `owned` is false, dispose leaves the connection alone and it stays
/// usable through this wrapper.
pub struct EagerInternalConnection {
    connection: Arc<dyn DbConnection>,
    owned: bool,
    disposed: AtomicBool,
    snapshot: Mutex<ConnectionSnapshot>,
    provider_name: RwLock<Option<String>>,
    app_config: RwLock<Arc<AppConfig>>,
}

impl EagerInternalConnection {
    pub fn new(connection: Arc<dyn DbConnection>, owned: bool, app_config: Arc<AppConfig>) -> Self {
        let snapshot = ConnectionSnapshot::take(connection.as_ref());
        Self {
            connection,
            owned,
            disposed: AtomicBool::new(false),
            snapshot: Mutex::new(snapshot),
            provider_name: RwLock::new(None),
            app_config: RwLock::new(app_config),
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }

    fn live_connection(&self) -> Result<&Arc<dyn DbConnection>> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(OrmError::ConnectionDisposed(
                self.connection.type_name().to_string(),
            ));
        }
        Ok(&self.connection)
    }
}

impl InternalConnection for EagerInternalConnection {
    fn connection(&self) -> Result<Arc<dyn DbConnection>> {
        self.live_connection().cloned()
    }

    fn connection_key(&self) -> Result<String> {
        let connection = self.live_connection()?;
        let mut snapshot = self.snapshot.lock();
        snapshot.refresh(connection.as_ref());
        Ok(internal::connection_key(
            connection.as_ref(),
            snapshot.original_connection_string(),
        ))
    }

    fn connection_has_model(&self) -> Result<bool> {
        Ok(self.connection.metadata_workspace().is_some())
    }

    fn connection_string_origin(&self) -> Result<ConnectionStringOrigin> {
        Ok(ConnectionStringOrigin::UserCode)
    }

    fn connection_string_name(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn original_connection_string(&self) -> Result<String> {
        let connection = self.live_connection()?;
        let mut snapshot = self.snapshot.lock();
        snapshot.refresh(connection.as_ref());
        Ok(snapshot.original_connection_string().to_string())
    }

    fn provider_name(&self) -> Result<String> {
        if let Some(provider) = self.provider_name.read().clone() {
            return Ok(provider);
        }
        Ok(self.live_connection()?.store_provider_invariant_name())
    }

    fn set_provider_name(&self, provider_name: Option<String>) {
        *self.provider_name.write() = provider_name;
    }

    fn app_config(&self) -> Arc<AppConfig> {
        self.app_config.read().clone()
    }

    fn set_app_config(&self, config: Arc<AppConfig>) {
        *self.app_config.write() = config;
    }

    fn lifecycle(&self) -> ConnectionLifecycle {
        if self.disposed.load(Ordering::SeqCst) {
            ConnectionLifecycle::Disposed
        } else {
            ConnectionLifecycle::Ready
        }
    }

    fn dispose(&self) {
        if !self.owned {
            return;
        }
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.connection.dispose();
            tracing::debug!(connection = %self.connection.type_name(), "disposed owned connection");
        }
    }
}

impl std::fmt::Debug for EagerInternalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EagerInternalConnection")
            .field("connection", &self.connection)
            .field("owned", &self.owned)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
