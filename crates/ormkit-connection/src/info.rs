//! Connection information supplied from outside the context

use ormkit_core::{AppConfig, ConnectionStringSettings, OrmError, Result};

/// Either the name of a config entry or a connection string with its
/// provider. Takes precedence over the name or connection string a context
/// was created with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DbConnectionInfo {
    Named(String),
    ConnectionString {
        connection_string: String,
        provider_invariant_name: String,
    },
}

impl DbConnectionInfo {
    pub fn named(name: impl Into<String>) -> Self {
        DbConnectionInfo::Named(name.into())
    }

    pub fn connection_string(
        connection_string: impl Into<String>,
        provider_invariant_name: impl Into<String>,
    ) -> Self {
        DbConnectionInfo::ConnectionString {
            connection_string: connection_string.into(),
            provider_invariant_name: provider_invariant_name.into(),
        }
    }

    /// The connection settings this info stands for.
    ///
    /// A named info must match a config entry exactly; the returned settings
    /// of a connection-string info have an empty name.
    pub fn resolve(&self, config: &AppConfig) -> Result<ConnectionStringSettings> {
        match self {
            DbConnectionInfo::Named(name) => config
                .connection_string(name)
                .cloned()
                .ok_or_else(|| OrmError::ConnectionStringNotFound(name.clone())),
            DbConnectionInfo::ConnectionString {
                connection_string,
                provider_invariant_name,
            } => Ok(ConnectionStringSettings::new(
                "",
                connection_string.clone(),
                provider_invariant_name.clone(),
            )),
        }
    }
}
