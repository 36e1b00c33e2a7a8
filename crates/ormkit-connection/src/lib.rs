//! ormkit connection - connection resolution and lifecycle
//!
//! This crate turns what a context was created with (a name, a connection
//! string, a `DbConnectionInfo` or an existing connection) into a live
//! [`DbConnection`](ormkit_core::DbConnection):
//!
//! - `LazyInternalConnection` - resolved on first use against the app config
//! - `EagerInternalConnection` - wraps a caller-supplied connection
//! - `EntityConnection` - a connection that carries model metadata
//! - `ConnectionFactory` - conventions for names not found in the config

mod eager;
mod entity;
mod factory;
mod info;
mod internal;
mod lazy;

#[cfg(test)]
mod test_support;

pub use eager::EagerInternalConnection;
pub use entity::{EntityConnection, EntityConnectionStringParts, load_metadata};
pub use factory::{
    ConnectionDependencies, ConnectionFactory, NAME_PLACEHOLDER, ProviderConnectionFactory,
};
pub use info::DbConnectionInfo;
pub use internal::{
    ConnectionLifecycle, ConnectionSnapshot, ConnectionStringOrigin, InternalConnection,
    connection_key,
};
pub use lazy::{LazyInternalConnection, find_connection_in_config};
