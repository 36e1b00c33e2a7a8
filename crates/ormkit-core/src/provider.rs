//! Provider traits: connection creation and store-level services

use std::sync::Arc;

use crate::{DbConnection, EntityChange, MetadataWorkspace, Result, SaveError};

/// Invariant name reserved for connections that carry their own model metadata
pub const ENTITY_CLIENT_PROVIDER: &str = "EntityClient";

/// Table holding the model hash written by code-first initializers
pub const HISTORY_TABLE: &str = "__MigrationHistory";

/// Factory for raw connections of one provider
pub trait ProviderFactory: Send + Sync {
    /// Unique invariant name (e.g. "Sqlite")
    fn invariant_name(&self) -> &str;

    /// Create a new, closed connection with an empty connection string
    fn create_connection(&self) -> Result<Arc<dyn DbConnection>>;

    /// Store-level services for connections of this provider
    fn services(&self) -> Arc<dyn ProviderServices>;
}

/// Store-level operations used by database initializers and change processing.
///
/// Every method receives a connection created by the same provider.
pub trait ProviderServices: Send + Sync {
    /// Token describing the store version, recorded in model provider info
    fn manifest_token(&self, connection: &dyn DbConnection) -> Result<String>;

    fn database_exists(&self, connection: &dyn DbConnection) -> Result<bool>;

    /// Create the database and one table per entity set of the workspace
    fn create_database(
        &self,
        connection: &dyn DbConnection,
        workspace: &MetadataWorkspace,
    ) -> Result<()>;

    fn delete_database(&self, connection: &dyn DbConnection) -> Result<()>;

    fn table_exists(&self, connection: &dyn DbConnection, table: &str) -> Result<bool>;

    /// Read the model hash stored for a context key, if any
    fn read_model_hash(&self, connection: &dyn DbConnection, context_key: &str)
    -> Result<Option<String>>;

    fn write_model_hash(
        &self,
        connection: &dyn DbConnection,
        context_key: &str,
        hash: &str,
    ) -> Result<()>;

    /// Apply tracked changes and return the number of affected entries
    fn apply_changes(
        &self,
        connection: &dyn DbConnection,
        changes: &[EntityChange],
    ) -> std::result::Result<usize, SaveError>;
}
