//! ormkit core - shared abstractions for the ormkit runtime
//!
//! This crate provides the traits and types every other ormkit crate
//! depends on:
//!
//! - `RetryLazy` / `RetryAction` - one-time computations that retry after failure
//! - `DbConnection` - trait for raw provider connections
//! - `ProviderFactory` / `ProviderServices` - provider extension points
//! - Model identity types like `ContextType`, `ModelCacheKey`, `CompiledModel`
//! - `AppConfig` - named connection strings and initializer settings
//! - `OrmError` and the update-error taxonomy

mod config;
mod connection;
pub mod connection_string;
mod error;
mod model;
mod provider;
mod retry;
mod update;

pub use config::*;
pub use connection::*;
pub use connection_string::ConnectionStringBuilder;
pub use error::*;
pub use model::*;
pub use provider::*;
pub use retry::*;
pub use update::*;
