//! The connection abstraction used by contexts
//!
//! An [`InternalConnection`] hides whether the underlying [`DbConnection`]
//! was supplied by the caller ([`crate::EagerInternalConnection`]) or is
//! resolved on first use from a name or connection string
//! ([`crate::LazyInternalConnection`]).

use std::fmt;
use std::sync::Arc;

use ormkit_core::{AppConfig, DbConnection, Result};

/// Where the connection string of a connection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStringOrigin {
    /// Derived by the default connection factory from a name
    Convention,
    /// Found in the application config
    Configuration,
    /// Passed in as a connection string or as an existing connection
    UserCode,
    /// Supplied through a `DbConnectionInfo`
    DbContextInfo,
}

impl fmt::Display for ConnectionStringOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStringOrigin::Convention => "Convention",
            ConnectionStringOrigin::Configuration => "Configuration",
            ConnectionStringOrigin::UserCode => "UserCode",
            ConnectionStringOrigin::DbContextInfo => "DbContextInfo",
        };
        f.write_str(name)
    }
}

/// Lifecycle of an internal connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionLifecycle {
    #[default]
    Uninitialized,
    Resolving,
    Ready,
    Disposed,
}

/// The connection string as it was when the connection was resolved,
/// together with the database and data source it pointed at.
///
/// Providers may rewrite the live connection string once a connection has
/// been opened (dropping credentials, for example), so the snapshot is what
/// identifies the connection in connection keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    original_connection_string: String,
    database: String,
    data_source: String,
}

impl ConnectionSnapshot {
    pub fn take(connection: &dyn DbConnection) -> Self {
        Self {
            original_connection_string: connection.connection_string(),
            database: connection.database(),
            data_source: connection.data_source(),
        }
    }

    pub fn original_connection_string(&self) -> &str {
        &self.original_connection_string
    }

    /// Whether the connection now points somewhere else than when the snapshot was taken
    pub fn is_stale(&self, connection: &dyn DbConnection) -> bool {
        !self.database.eq_ignore_ascii_case(&connection.database())
            || !self.data_source.eq_ignore_ascii_case(&connection.data_source())
    }

    /// Re-take the snapshot if the connection has moved, returning whether it did
    pub fn refresh(&mut self, connection: &dyn DbConnection) -> bool {
        if self.is_stale(connection) {
            *self = Self::take(connection);
            true
        } else {
            false
        }
    }
}

/// Key identifying a connection in the initialized-database registry
pub fn connection_key(connection: &dyn DbConnection, original_connection_string: &str) -> String {
    match connection.metadata_paths() {
        Some(paths) => format!(
            "{};{};{}",
            connection.type_name(),
            paths,
            original_connection_string
        ),
        None => format!("{};{}", connection.type_name(), original_connection_string),
    }
}

/// A connection as seen by a context
pub trait InternalConnection: Send + Sync {
    /// The underlying connection, resolving it first if needed
    fn connection(&self) -> Result<Arc<dyn DbConnection>>;

    /// Key of the connection used to track database initialization
    fn connection_key(&self) -> Result<String>;

    /// Whether the connection carries its own model metadata
    fn connection_has_model(&self) -> Result<bool>;

    fn connection_string_origin(&self) -> Result<ConnectionStringOrigin>;

    /// Name of the config entry the connection string came from, if any
    fn connection_string_name(&self) -> Result<Option<String>>;

    /// The connection string at resolution time, re-taken if the connection
    /// now points at a different database or data source
    fn original_connection_string(&self) -> Result<String>;

    /// Provider invariant name, the explicitly set one if any
    fn provider_name(&self) -> Result<String>;

    /// Set the provider used to create connections from plain connection strings
    fn set_provider_name(&self, provider_name: Option<String>);

    fn app_config(&self) -> Arc<AppConfig>;

    /// Replace the config used for resolution. Has no effect on an already
    /// resolved connection until it is disposed.
    fn set_app_config(&self, config: Arc<AppConfig>);

    fn lifecycle(&self) -> ConnectionLifecycle;

    fn dispose(&self);
}

impl fmt::Debug for dyn InternalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalConnection")
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
