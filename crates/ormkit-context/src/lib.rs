//! ormkit context - coordination between user contexts and the store
//!
//! This crate connects a user's [`DbContext`] type to a compiled model, an
//! [`ObjectContext`] and a database that has been initialized for that model.
//!
//! # Architecture
//!
//! ```text
//! DbContext (user type)
//!     ↓
//! InternalContext (LazyInternalContext / EagerInternalContext) ← This crate
//!     ↓                     ↓                      ↓
//! ModelCache       InitializationRegistry     ObjectContext
//!     ↓                                            ↓
//! ormkit-connection (InternalConnection)    ormkit-providers (ProviderServices)
//! ```
//!
//! # Components
//!
//! - [`LazyInternalContext`] - builds its model and object context on first use
//! - [`EagerInternalContext`] - wraps an existing object context
//! - [`ModelCache`] - one compiled model per context type and provider
//! - [`InitializationRegistry`] - one database initialization per model and connection
//! - [`InitializerResolver`] - picks the initializer from the config and registrations
//! - [`ContextServices`] - the caches and extension points shared by contexts
//!
//! # Design Principles
//!
//! 1. **Nothing happens at construction** - connections, models and databases
//!    are resolved when first needed
//! 2. **Failures are retried** - a failed model build or initialization is
//!    attempted again by the next caller
//! 3. **Shared state is explicit** - contexts share caches only through the
//!    [`ContextServices`] they were created with

mod async_ext;
mod cache_key;
mod caches;
mod change_processor;
mod context_info;
mod eager;
mod initializer;
mod internal;
mod lazy;
mod model_builder;
mod object_context;
mod owner;
mod pipeline;
mod services;

#[cfg(test)]
mod test_support;

pub use async_ext::InternalContextAsyncExt;
pub use cache_key::{DefaultModelCacheKeyFactory, ModelCacheKeyFactory};
pub use caches::{
    InitializationAction, InitializationKey, InitializationRegistry, ModelCache, ModelFactory,
};
pub use change_processor::{ChangeProcessor, ProviderChangeProcessor};
pub use context_info::DbContextInfo;
pub use eager::EagerInternalContext;
pub use initializer::{
    CREATE_DATABASE_IF_NOT_EXISTS, CreateDatabaseIfNotExists, DROP_CREATE_DATABASE_ALWAYS,
    DROP_CREATE_DATABASE_IF_MODEL_CHANGES, DatabaseExistenceState, DatabaseInitializer,
    DropCreateDatabaseAlways, DropCreateDatabaseIfModelChanges, InitializerFactory,
    InitializerResolver, NULL_INITIALIZER, NullDatabaseInitializer, Seed, any_model_table_exists,
};
pub use internal::{ContextBase, InternalContext, OnModelCreating};
pub use lazy::LazyInternalContext;
pub use model_builder::{ModelBuilder, strip_invalid_characters};
pub use object_context::{ContextOptions, EntryState, ObjectContext, SaveOptions};
pub use owner::DbContext;
pub use pipeline::{ConventionModelPipeline, ModelPipeline, pluralize};
pub use services::ContextServices;
