//! SQLite provider factory

use std::sync::Arc;

use ormkit_core::{DbConnection, ProviderFactory, ProviderServices, Result};

use crate::{SQLITE_PROVIDER, SqliteConnection, SqliteProviderServices};

/// SQLite provider
pub struct SqliteProviderFactory {
    services: Arc<SqliteProviderServices>,
}

impl SqliteProviderFactory {
    /// Create a new SQLite provider instance
    pub fn new() -> Self {
        tracing::debug!("SQLite provider initialized");
        Self {
            services: Arc::new(SqliteProviderServices::new()),
        }
    }
}

impl Default for SqliteProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory for SqliteProviderFactory {
    fn invariant_name(&self) -> &str {
        SQLITE_PROVIDER
    }

    fn create_connection(&self) -> Result<Arc<dyn DbConnection>> {
        Ok(Arc::new(SqliteConnection::new()))
    }

    fn services(&self) -> Arc<dyn ProviderServices> {
        self.services.clone()
    }
}
