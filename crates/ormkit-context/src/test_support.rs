//! In-memory provider used by unit tests

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ormkit_core::{
    AppConfig, ConnectionState, ConnectionStringBuilder, DbConnection, EntityChange, EntityType,
    MetadataWorkspace, OrmError, ProviderFactory, ProviderServices, Result, SaveError, UpdateError,
};
use ormkit_providers::ProviderRegistry;
use parking_lot::Mutex;

use crate::{ContextServices, DatabaseInitializer, DbContext, InternalContext, ModelBuilder};

pub const MOCK_PROVIDER: &str = "Mock";

/// Shared state of every database the mock provider knows about
#[derive(Default)]
pub struct MockStore {
    pub databases: Mutex<HashSet<String>>,
    pub tables: Mutex<HashSet<(String, String)>>,
    pub hashes: Mutex<HashMap<(String, String), String>>,
    pub saved: Mutex<Vec<EntityChange>>,
    pub create_count: AtomicUsize,
    pub delete_count: AtomicUsize,
    /// Number of upcoming `database_exists` calls that fail
    pub failing_exists_probes: AtomicUsize,
    /// Number of upcoming `table_exists` calls that fail
    pub failing_table_probes: AtomicUsize,
    pub update_failure: Mutex<Option<UpdateError>>,
}

impl MockStore {
    pub fn database_created(&self, database: &str) -> bool {
        self.databases.lock().contains(database)
    }
}

pub struct MockConnection {
    provider: String,
    connection_string: Mutex<String>,
    state: Mutex<ConnectionState>,
    disposed: AtomicBool,
}

impl MockConnection {
    pub fn new(provider: &str, connection_string: &str) -> Self {
        Self {
            provider: provider.to_string(),
            connection_string: Mutex::new(connection_string.to_string()),
            state: Mutex::new(ConnectionState::Closed),
            disposed: AtomicBool::new(false),
        }
    }
}

impl DbConnection for MockConnection {
    fn provider_invariant_name(&self) -> &str {
        &self.provider
    }

    fn type_name(&self) -> &str {
        "MockConnection"
    }

    fn connection_string(&self) -> String {
        self.connection_string.lock().clone()
    }

    fn set_connection_string(&self, connection_string: &str) -> Result<()> {
        *self.connection_string.lock() = connection_string.to_string();
        Ok(())
    }

    fn database(&self) -> String {
        ConnectionStringBuilder::parse(&self.connection_string.lock())
            .ok()
            .and_then(|b| b.get("Database").map(str::to_string))
            .unwrap_or_default()
    }

    fn data_source(&self) -> String {
        String::new()
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn open(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(OrmError::ConnectionDisposed("MockConnection".into()));
        }
        *self.state.lock() = ConnectionState::Open;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.state.lock() = ConnectionState::Closed;
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockServices {
    store: Arc<MockStore>,
}

impl ProviderServices for MockServices {
    fn manifest_token(&self, _connection: &dyn DbConnection) -> Result<String> {
        Ok("mock-1".into())
    }

    fn database_exists(&self, connection: &dyn DbConnection) -> Result<bool> {
        let failing = self.store.failing_exists_probes.load(Ordering::SeqCst);
        if failing > 0 {
            self.store.failing_exists_probes.store(failing - 1, Ordering::SeqCst);
            return Err(OrmError::Connection("server unavailable".into()));
        }
        Ok(self.store.database_created(&connection.database()))
    }

    fn create_database(
        &self,
        connection: &dyn DbConnection,
        workspace: &MetadataWorkspace,
    ) -> Result<()> {
        let database = connection.database();
        self.store.create_count.fetch_add(1, Ordering::SeqCst);
        self.store.databases.lock().insert(database.clone());
        let mut tables = self.store.tables.lock();
        for set in &workspace.entity_sets {
            tables.insert((database.clone(), set.name.clone()));
        }
        Ok(())
    }

    fn delete_database(&self, connection: &dyn DbConnection) -> Result<()> {
        let database = connection.database();
        self.store.delete_count.fetch_add(1, Ordering::SeqCst);
        self.store.databases.lock().remove(&database);
        self.store.tables.lock().retain(|(db, _)| *db != database);
        self.store.hashes.lock().retain(|(db, _), _| *db != database);
        Ok(())
    }

    fn table_exists(&self, connection: &dyn DbConnection, table: &str) -> Result<bool> {
        let failing = self.store.failing_table_probes.load(Ordering::SeqCst);
        if failing > 0 {
            self.store.failing_table_probes.store(failing - 1, Ordering::SeqCst);
            return Err(OrmError::Data("permission denied".into()));
        }
        Ok(self
            .store
            .tables
            .lock()
            .contains(&(connection.database(), table.to_string())))
    }

    fn read_model_hash(
        &self,
        connection: &dyn DbConnection,
        context_key: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .store
            .hashes
            .lock()
            .get(&(connection.database(), context_key.to_string()))
            .cloned())
    }

    fn write_model_hash(
        &self,
        connection: &dyn DbConnection,
        context_key: &str,
        hash: &str,
    ) -> Result<()> {
        self.store
            .hashes
            .lock()
            .insert((connection.database(), context_key.to_string()), hash.to_string());
        Ok(())
    }

    fn apply_changes(
        &self,
        _connection: &dyn DbConnection,
        changes: &[EntityChange],
    ) -> std::result::Result<usize, SaveError> {
        if let Some(failure) = self.store.update_failure.lock().take() {
            return Err(SaveError::Update(failure));
        }
        self.store.saved.lock().extend(changes.iter().cloned());
        Ok(changes.len())
    }
}

pub struct MockProviderFactory {
    name: String,
    pub store: Arc<MockStore>,
}

impl MockProviderFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            store: Arc::new(MockStore::default()),
        }
    }
}

impl ProviderFactory for MockProviderFactory {
    fn invariant_name(&self) -> &str {
        &self.name
    }

    fn create_connection(&self) -> Result<Arc<dyn DbConnection>> {
        Ok(Arc::new(MockConnection::new(&self.name, "")))
    }

    fn services(&self) -> Arc<dyn ProviderServices> {
        Arc::new(MockServices {
            store: self.store.clone(),
        })
    }
}

/// A registry holding one mock provider, and that provider's store
pub fn mock_registry() -> (Arc<ProviderRegistry>, Arc<MockStore>) {
    let factory = Arc::new(MockProviderFactory::new(MOCK_PROVIDER));
    let store = factory.store.clone();
    (Arc::new(ProviderRegistry::new().with_provider(factory)), store)
}

/// A closed mock connection to `database`
pub fn mock_connection(database: &str) -> Arc<dyn DbConnection> {
    Arc::new(MockConnection::new(
        MOCK_PROVIDER,
        &format!("Database={database}"),
    ))
}

/// Config with two named mock databases, `Blogs` and `Archive`
pub fn mock_config() -> AppConfig {
    AppConfig::new()
        .with_connection_string("Blogs", "Database=blogs", MOCK_PROVIDER)
        .with_connection_string("Archive", "Database=archive", MOCK_PROVIDER)
}

/// Services over the mock provider and [`mock_config`]
pub fn mock_services() -> (Arc<ContextServices>, Arc<MockStore>) {
    services_with_config(mock_config())
}

pub fn services_with_config(config: AppConfig) -> (Arc<ContextServices>, Arc<MockStore>) {
    let (providers, store) = mock_registry();
    (
        Arc::new(ContextServices::new(providers).with_app_config(config)),
        store,
    )
}

/// A context with blogs, featured blogs and posts
#[derive(Default)]
pub struct BloggingContext {
    pub model_creations: AtomicUsize,
    /// Number of upcoming model builds that fail
    pub failing_model_builds: AtomicUsize,
}

impl DbContext for BloggingContext {
    fn on_model_creating(&self, builder: &mut ModelBuilder) -> Result<()> {
        let failing = self.failing_model_builds.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_model_builds.store(failing - 1, Ordering::SeqCst);
            return Err(OrmError::Connection("server unavailable".into()));
        }
        self.model_creations.fetch_add(1, Ordering::SeqCst);
        builder
            .entity(EntityType::new("Blog"))
            .entity(EntityType::new("FeaturedBlog").derived_from("Blog"))
            .entity(EntityType::new("Post"));
        Ok(())
    }

    fn validate_entry(&self, change: &EntityChange) -> Result<()> {
        if change.values.get("title").and_then(|title| title.as_str()) == Some("") {
            return Err(OrmError::Validation(format!(
                "{} '{}' needs a title",
                change.entity_type, change.key
            )));
        }
        Ok(())
    }
}

/// Counts its runs and fails while `failures` is positive
#[derive(Default)]
pub struct CountingInitializer {
    pub runs: AtomicUsize,
    pub failures: AtomicUsize,
}

impl DatabaseInitializer for CountingInitializer {
    fn name(&self) -> &str {
        "CountingInitializer"
    }

    fn initialize_database(&self, _context: &dyn InternalContext) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let failing = self.failures.load(Ordering::SeqCst);
        if failing > 0 {
            self.failures.store(failing - 1, Ordering::SeqCst);
            return Err(OrmError::Connection("database offline".into()));
        }
        Ok(())
    }
}
