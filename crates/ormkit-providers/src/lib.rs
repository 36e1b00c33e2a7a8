//! ormkit providers - provider registry and built-in providers
//!
//! This crate collects the concrete providers implementing the traits
//! defined in `ormkit-core` behind feature flags, and the shared runtime used
//! by async pass-through operations.

#[cfg(feature = "sqlite")]
pub use ormkit_provider_sqlite as sqlite;

mod registry;
mod runtime;

pub use registry::ProviderRegistry;
pub use runtime::runtime_handle;

/// Re-export commonly used types from ormkit-core
pub use ormkit_core::{DbConnection, OrmError, ProviderFactory, ProviderServices, Result};
