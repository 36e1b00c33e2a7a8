//! Common test utilities and mocks
#![allow(dead_code)]

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ormkit_context::{ContextServices, DbContext, ModelBuilder};
use ormkit_core::{
    AppConfig, ConnectionState, ConnectionStringBuilder, DbConnection, EntityChange, EntityType,
    MetadataWorkspace, OrmError, ProviderFactory, ProviderServices, Result, SaveError, UpdateError,
};
use ormkit_providers::ProviderRegistry;
use parking_lot::Mutex;

pub const RECORDING_PROVIDER: &str = "Recording";

/// Route test logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory provider that records what the runtime asks of the store.
///
/// Clones share the same store, so a test can keep one handle for
/// assertions while the registry owns another.
#[derive(Clone)]
pub struct RecordingProvider {
    pub name: String,
    pub manifest_token: String,
    pub databases: Arc<Mutex<HashSet<String>>>,
    pub hashes: Arc<Mutex<HashMap<(String, String), String>>>,
    pub saved: Arc<Mutex<Vec<EntityChange>>>,
    /// Failures returned by the next saves, in order
    pub update_failures: Arc<Mutex<Vec<UpdateError>>>,
    pub create_count: Arc<AtomicUsize>,
    pub connections: Arc<Mutex<Vec<Arc<RecordingConnection>>>>,
}

impl RecordingProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manifest_token: "recording-1".to_string(),
            databases: Arc::new(Mutex::new(HashSet::new())),
            hashes: Arc::new(Mutex::new(HashMap::new())),
            saved: Arc::new(Mutex::new(Vec::new())),
            update_failures: Arc::new(Mutex::new(Vec::new())),
            create_count: Arc::new(AtomicUsize::new(0)),
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_manifest_token(mut self, token: impl Into<String>) -> Self {
        self.manifest_token = token.into();
        self
    }

    pub fn with_update_failure(self, failure: UpdateError) -> Self {
        self.update_failures.lock().push(failure);
        self
    }

    pub fn with_database(self, database: impl Into<String>) -> Self {
        self.databases.lock().insert(database.into());
        self
    }

    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Vec<EntityChange> {
        self.saved.lock().clone()
    }

    pub fn has_database(&self, database: &str) -> bool {
        self.databases.lock().contains(database)
    }

    pub fn registry(&self) -> Arc<ProviderRegistry> {
        Arc::new(ProviderRegistry::new().with_provider(Arc::new(self.clone())))
    }
}

impl ProviderFactory for RecordingProvider {
    fn invariant_name(&self) -> &str {
        &self.name
    }

    fn create_connection(&self) -> Result<Arc<dyn DbConnection>> {
        let connection = Arc::new(RecordingConnection::new(&self.name));
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }

    fn services(&self) -> Arc<dyn ProviderServices> {
        Arc::new(self.clone())
    }
}

impl ProviderServices for RecordingProvider {
    fn manifest_token(&self, _connection: &dyn DbConnection) -> Result<String> {
        Ok(self.manifest_token.clone())
    }

    fn database_exists(&self, connection: &dyn DbConnection) -> Result<bool> {
        Ok(self.has_database(&connection.database()))
    }

    fn create_database(
        &self,
        connection: &dyn DbConnection,
        _workspace: &MetadataWorkspace,
    ) -> Result<()> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        self.databases.lock().insert(connection.database());
        Ok(())
    }

    fn delete_database(&self, connection: &dyn DbConnection) -> Result<()> {
        let database = connection.database();
        self.databases.lock().remove(&database);
        self.hashes.lock().retain(|(db, _), _| *db != database);
        Ok(())
    }

    fn table_exists(&self, connection: &dyn DbConnection, _table: &str) -> Result<bool> {
        Ok(self.has_database(&connection.database()))
    }

    fn read_model_hash(
        &self,
        connection: &dyn DbConnection,
        context_key: &str,
    ) -> Result<Option<String>> {
        Ok(self
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
        self.hashes
            .lock()
            .insert((connection.database(), context_key.to_string()), hash.to_string());
        Ok(())
    }

    fn apply_changes(
        &self,
        _connection: &dyn DbConnection,
        changes: &[EntityChange],
    ) -> std::result::Result<usize, SaveError> {
        let mut failures = self.update_failures.lock();
        if !failures.is_empty() {
            return Err(SaveError::Update(failures.remove(0)));
        }
        self.saved.lock().extend(changes.iter().cloned());
        Ok(changes.len())
    }
}

/// Connection created by [`RecordingProvider`]
pub struct RecordingConnection {
    provider: String,
    connection_string: Mutex<String>,
    state: Mutex<ConnectionState>,
    disposed: AtomicBool,
}

impl RecordingConnection {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            connection_string: Mutex::new(String::new()),
            state: Mutex::new(ConnectionState::Closed),
            disposed: AtomicBool::new(false),
        }
    }
}

impl DbConnection for RecordingConnection {
    fn provider_invariant_name(&self) -> &str {
        &self.provider
    }

    fn type_name(&self) -> &str {
        "RecordingConnection"
    }

    fn connection_string(&self) -> String {
        self.connection_string.lock().clone()
    }

    fn set_connection_string(&self, connection_string: &str) -> Result<()> {
        if self.state() == ConnectionState::Open {
            return Err(OrmError::Connection(
                "cannot change the connection string of an open connection".into(),
            ));
        }
        *self.connection_string.lock() = connection_string.to_string();
        Ok(())
    }

    fn database(&self) -> String {
        ConnectionStringBuilder::parse(&self.connection_string())
            .ok()
            .and_then(|builder| builder.get("Database").map(str::to_string))
            .unwrap_or_default()
    }

    fn data_source(&self) -> String {
        "recording".to_string()
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn open(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(OrmError::ConnectionDisposed(self.type_name().to_string()));
        }
        *self.state.lock() = ConnectionState::Open;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.state.lock() = ConnectionState::Closed;
        Ok(())
    }

    fn dispose(&self) {
        *self.state.lock() = ConnectionState::Closed;
        self.disposed.store(true, Ordering::SeqCst);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A shop with customers, orders and rush orders; optionally reviews
#[derive(Default)]
pub struct ShopContext {
    pub model_creations: Arc<AtomicUsize>,
    pub with_reviews: bool,
}

impl ShopContext {
    pub fn counting(model_creations: Arc<AtomicUsize>) -> Self {
        Self {
            model_creations,
            with_reviews: false,
        }
    }

    pub fn with_reviews(mut self) -> Self {
        self.with_reviews = true;
        self
    }
}

impl DbContext for ShopContext {
    fn on_model_creating(&self, builder: &mut ModelBuilder) -> Result<()> {
        self.model_creations.fetch_add(1, Ordering::SeqCst);
        builder
            .entity(EntityType::new("Customer"))
            .entity(EntityType::new("Order"))
            .entity(EntityType::new("RushOrder").derived_from("Order"));
        if self.with_reviews {
            builder.entity(EntityType::new("Review"));
        }
        Ok(())
    }

    fn validate_entry(&self, change: &EntityChange) -> Result<()> {
        if change.entity_type == "Customer" && change.values.get("name").is_none() {
            return Err(OrmError::Validation(format!(
                "customer '{}' has no name",
                change.key
            )));
        }
        Ok(())
    }
}

/// Config naming the `Shop` database on the recording provider
pub fn shop_config() -> AppConfig {
    AppConfig::new().with_connection_string("Shop", "Database=shop", RECORDING_PROVIDER)
}

pub fn shop_services(provider: &RecordingProvider) -> Arc<ContextServices> {
    Arc::new(ContextServices::new(provider.registry()).with_app_config(shop_config()))
}
