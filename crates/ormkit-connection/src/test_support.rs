//! Mock provider used by unit tests

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use ormkit_core::{
    ConnectionState, ConnectionStringBuilder, DbConnection, EntityChange, MetadataWorkspace,
    OrmError, ProviderFactory, ProviderServices, Result, SaveError,
};
use parking_lot::Mutex;

/// Connection whose database and data source come from the `Database` and
/// `Server` keywords
pub struct MockConnection {
    provider: String,
    connection_string: Mutex<String>,
    state: Mutex<ConnectionState>,
    disposed: AtomicBool,
    pub dispose_count: AtomicUsize,
}

impl MockConnection {
    pub fn new(provider: &str, connection_string: &str) -> Self {
        Self {
            provider: provider.to_string(),
            connection_string: Mutex::new(connection_string.to_string()),
            state: Mutex::new(ConnectionState::Closed),
            disposed: AtomicBool::new(false),
            dispose_count: AtomicUsize::new(0),
        }
    }

    fn keyword(&self, keyword: &str) -> String {
        ConnectionStringBuilder::parse(&self.connection_string.lock())
            .ok()
            .and_then(|b| b.get(keyword).map(str::to_string))
            .unwrap_or_default()
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
        self.keyword("Database")
    }

    fn data_source(&self) -> String {
        self.keyword("Server")
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
        self.dispose_count.fetch_add(1, Ordering::SeqCst);
        self.disposed.store(true, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Closed;
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct MockServices;

impl ProviderServices for MockServices {
    fn manifest_token(&self, _connection: &dyn DbConnection) -> Result<String> {
        Ok("mock-1".into())
    }

    fn database_exists(&self, _connection: &dyn DbConnection) -> Result<bool> {
        Ok(false)
    }

    fn create_database(
        &self,
        _connection: &dyn DbConnection,
        _workspace: &MetadataWorkspace,
    ) -> Result<()> {
        Ok(())
    }

    fn delete_database(&self, _connection: &dyn DbConnection) -> Result<()> {
        Ok(())
    }

    fn table_exists(&self, _connection: &dyn DbConnection, _table: &str) -> Result<bool> {
        Ok(false)
    }

    fn read_model_hash(
        &self,
        _connection: &dyn DbConnection,
        _context_key: &str,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    fn write_model_hash(
        &self,
        _connection: &dyn DbConnection,
        _context_key: &str,
        _hash: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn apply_changes(
        &self,
        _connection: &dyn DbConnection,
        changes: &[EntityChange],
    ) -> std::result::Result<usize, SaveError> {
        Ok(changes.len())
    }
}

/// Provider that remembers every connection it created
pub struct MockProviderFactory {
    name: String,
    pub created: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockProviderFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn last_created(&self) -> Option<Arc<MockConnection>> {
        self.created.lock().last().cloned()
    }
}

impl ProviderFactory for MockProviderFactory {
    fn invariant_name(&self) -> &str {
        &self.name
    }

    fn create_connection(&self) -> Result<Arc<dyn DbConnection>> {
        let connection = Arc::new(MockConnection::new(&self.name, ""));
        self.created.lock().push(connection.clone());
        Ok(connection)
    }

    fn services(&self) -> Arc<dyn ProviderServices> {
        Arc::new(MockServices)
    }
}
