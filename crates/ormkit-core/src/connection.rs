//! Connection trait implemented by providers

use std::any::Any;
use std::sync::Arc;

use crate::{MetadataWorkspace, Result};

/// Open/closed state of a raw connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Open,
}

/// A raw database connection created by a provider.
///
/// Methods take `&self`; implementations keep their mutable parts behind
/// interior locks so that a connection can be shared through `Arc`.
pub trait DbConnection: Send + Sync {
    /// Invariant name of the provider that created the connection (e.g. "Sqlite")
    fn provider_invariant_name(&self) -> &str;

    /// Name of the connection type, used as the first part of connection keys
    fn type_name(&self) -> &str;

    /// The live connection string
    fn connection_string(&self) -> String;

    /// Replace the connection string. Fails if the connection is open.
    fn set_connection_string(&self, connection_string: &str) -> Result<()>;

    /// Database name as currently reported by the connection
    fn database(&self) -> String;

    /// Data source (server, file) as currently reported by the connection
    fn data_source(&self) -> String;

    fn state(&self) -> ConnectionState;

    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Release the underlying resources. Idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    /// The store connection wrapped by a metadata-bearing connection
    fn store_connection(&self) -> Option<Arc<dyn DbConnection>> {
        None
    }

    /// Model metadata carried by the connection itself
    fn metadata_workspace(&self) -> Option<Arc<MetadataWorkspace>> {
        None
    }

    /// Metadata paths, for connections that carry model metadata
    fn metadata_paths(&self) -> Option<String> {
        None
    }

    /// Invariant name of the provider that talks to the store.
    ///
    /// Same as [`DbConnection::provider_invariant_name`] unless the connection
    /// wraps a store connection.
    fn store_provider_invariant_name(&self) -> String {
        match self.store_connection() {
            Some(store) => store.provider_invariant_name().to_string(),
            None => self.provider_invariant_name().to_string(),
        }
    }
}

impl std::fmt::Debug for dyn DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("type", &self.type_name())
            .field("provider", &self.provider_invariant_name())
            .field("database", &self.database())
            .finish()
    }
}
