//! Database initialization strategies
//!
//! An initializer runs at most once per model and connection in a process,
//! the first time a context is fully initialized. The built-in strategies
//! mirror the usual code-first choices: do nothing, create if missing, always
//! recreate, and recreate when the stored model hash no longer matches.

use std::sync::Arc;

use ormkit_core::{OrmError, Result};

use crate::InternalContext;

mod resolver;

pub use resolver::{InitializerFactory, InitializerResolver};

/// Initializer name meaning "do nothing"
pub const NULL_INITIALIZER: &str = "NullDatabaseInitializer";
pub const CREATE_DATABASE_IF_NOT_EXISTS: &str = "CreateDatabaseIfNotExists";
pub const DROP_CREATE_DATABASE_ALWAYS: &str = "DropCreateDatabaseAlways";
pub const DROP_CREATE_DATABASE_IF_MODEL_CHANGES: &str = "DropCreateDatabaseIfModelChanges";

/// Seeds a freshly created database. Changes tracked by the seed are saved
/// afterwards.
pub type Seed = Arc<dyn Fn(&dyn InternalContext) -> Result<()> + Send + Sync>;

/// A database initialization strategy
pub trait DatabaseInitializer: Send + Sync {
    fn name(&self) -> &str;

    fn initialize_database(&self, context: &dyn InternalContext) -> Result<()>;
}

/// What is known about the database before it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseExistenceState {
    Unknown,
    DoesNotExist,
    /// The database exists but holds none of the model's tables
    ExistsConsideredEmpty,
    Exists,
}

/// Probe the database for the tables of the code-first model.
///
/// A failing table probe is logged and treated as "tables exist", so that
/// an initializer never recreates a database it could not inspect.
pub fn any_model_table_exists(context: &dyn InternalContext) -> Result<DatabaseExistenceState> {
    if !context.database_exists()? {
        return Ok(DatabaseExistenceState::DoesNotExist);
    }

    match probe_model_tables(context) {
        Ok(true) => Ok(DatabaseExistenceState::Exists),
        Ok(false) => Ok(DatabaseExistenceState::ExistsConsideredEmpty),
        Err(e) => {
            tracing::warn!(error = %e, context = %context.context_type(), "model table probe failed; assuming the tables exist");
            Ok(DatabaseExistenceState::Exists)
        }
    }
}

fn probe_model_tables(context: &dyn InternalContext) -> Result<bool> {
    let Some(model) = context.code_first_model()? else {
        return Ok(true);
    };
    let entity_sets = &model.workspace().entity_sets;
    if entity_sets.is_empty() {
        return Ok(true);
    }

    let object_context = context.object_context_without_database_initialization()?;
    for set in entity_sets {
        if object_context.table_exists(&set.name)? {
            return Ok(true);
        }
    }
    Ok(context.query_for_model_hash()?.is_some())
}

fn seed_and_save(context: &dyn InternalContext, seed: Option<&Seed>) -> Result<()> {
    if let Some(seed) = seed {
        seed(context)?;
    }
    context.save_changes()?;
    Ok(())
}

/// Does nothing
#[derive(Debug, Default)]
pub struct NullDatabaseInitializer;

impl DatabaseInitializer for NullDatabaseInitializer {
    fn name(&self) -> &str {
        NULL_INITIALIZER
    }

    fn initialize_database(&self, _context: &dyn InternalContext) -> Result<()> {
        Ok(())
    }
}

/// Creates the database if it does not exist or holds none of the model's
/// tables. An existing database must match the model when it stores a hash.
#[derive(Default)]
pub struct CreateDatabaseIfNotExists {
    seed: Option<Seed>,
}

impl CreateDatabaseIfNotExists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl DatabaseInitializer for CreateDatabaseIfNotExists {
    fn name(&self) -> &str {
        CREATE_DATABASE_IF_NOT_EXISTS
    }

    fn initialize_database(&self, context: &dyn InternalContext) -> Result<()> {
        let existence = any_model_table_exists(context)?;
        if existence == DatabaseExistenceState::Exists {
            if !context.compatible_with_model(false)? {
                return Err(OrmError::ModelIncompatible(context.context_type().database_name()));
            }
            return Ok(());
        }

        context.create_database_with(existence)?;
        seed_and_save(context, self.seed.as_ref())
    }
}

/// Deletes and recreates the database every time
#[derive(Default)]
pub struct DropCreateDatabaseAlways {
    seed: Option<Seed>,
}

impl DropCreateDatabaseAlways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl DatabaseInitializer for DropCreateDatabaseAlways {
    fn name(&self) -> &str {
        DROP_CREATE_DATABASE_ALWAYS
    }

    fn initialize_database(&self, context: &dyn InternalContext) -> Result<()> {
        context.delete_database()?;
        context.create_database_with(DatabaseExistenceState::DoesNotExist)?;
        seed_and_save(context, self.seed.as_ref())
    }
}

/// Recreates the database when the stored model hash differs from the model.
/// A database without a stored hash is an error.
#[derive(Default)]
pub struct DropCreateDatabaseIfModelChanges {
    seed: Option<Seed>,
}

impl DropCreateDatabaseIfModelChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl DatabaseInitializer for DropCreateDatabaseIfModelChanges {
    fn name(&self) -> &str {
        DROP_CREATE_DATABASE_IF_MODEL_CHANGES
    }

    fn initialize_database(&self, context: &dyn InternalContext) -> Result<()> {
        if context.database_exists()? {
            if context.compatible_with_model(true)? {
                return Ok(());
            }
            tracing::info!(context = %context.context_type(), "model changed; recreating database");
            context.delete_database()?;
        }

        context.create_database_with(DatabaseExistenceState::DoesNotExist)?;
        seed_and_save(context, self.seed.as_ref())
    }
}

impl std::fmt::Debug for dyn DatabaseInitializer + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
