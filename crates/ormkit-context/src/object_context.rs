//! The lower-level context: a connection, a model and the tracked entities
//!
//! An [`ObjectContext`] is created once per internal context, either from a
//! compiled model and a store connection or from a connection that carries
//! its own model metadata. Entity tracking is snapshot based: attached
//! entities remember their original values and [`ObjectContext::detect_changes`]
//! marks the ones whose current values differ.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ormkit_core::{
    CompiledModel, DbConnection, EntityChange, EntitySetTypePair, EntityState, MetadataWorkspace,
    OrmError, ProviderServices, Result,
};
use ormkit_providers::ProviderRegistry;
use parking_lot::{Mutex, RwLock};

use crate::ChangeProcessor;

/// Behavior switches of an object context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub lazy_loading_enabled: bool,
    pub proxy_creation_enabled: bool,
    pub use_consistent_null_reference_behavior: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            lazy_loading_enabled: false,
            proxy_creation_enabled: true,
            use_consistent_null_reference_behavior: false,
        }
    }
}

/// How [`ObjectContext::save_changes`] treats the tracked entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    pub detect_changes_before_save: bool,
    pub accept_all_changes_after_save: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            detect_changes_before_save: true,
            accept_all_changes_after_save: true,
        }
    }
}

/// State of a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
struct TrackedEntry {
    entity_set: String,
    entity_type: String,
    key: String,
    state: EntryState,
    original: serde_json::Value,
    current: serde_json::Value,
}

impl TrackedEntry {
    fn to_change(&self) -> Option<EntityChange> {
        let state = match self.state {
            EntryState::Unchanged => return None,
            EntryState::Added => EntityState::Added,
            EntryState::Modified => EntityState::Modified,
            EntryState::Deleted => EntityState::Deleted,
        };
        Some(EntityChange {
            entity_set: self.entity_set.clone(),
            entity_type: self.entity_type.clone(),
            key: self.key.clone(),
            state,
            values: self.current.clone(),
        })
    }
}

pub struct ObjectContext {
    connection: Arc<dyn DbConnection>,
    model: Option<Arc<CompiledModel>>,
    workspace: Arc<MetadataWorkspace>,
    store_services: Arc<dyn ProviderServices>,
    change_processor: Arc<dyn ChangeProcessor>,
    options: RwLock<ContextOptions>,
    entries: Mutex<Vec<TrackedEntry>>,
    disposed: AtomicBool,
}

impl ObjectContext {
    /// Create an object context for a compiled model.
    ///
    /// Fails with [`OrmError::ProviderMismatch`] if the model was built for a
    /// different store provider than the connection's.
    pub fn for_model(
        model: Arc<CompiledModel>,
        connection: Arc<dyn DbConnection>,
        providers: &ProviderRegistry,
        change_processor: Arc<dyn ChangeProcessor>,
    ) -> Result<Self> {
        let model_provider = &model.provider_info().provider_invariant_name;
        let connection_provider = connection.store_provider_invariant_name();
        if !model_provider.eq_ignore_ascii_case(&connection_provider) {
            return Err(OrmError::ProviderMismatch {
                model_provider: model_provider.clone(),
                connection_provider,
            });
        }

        let store_services = providers.services(&connection_provider)?;
        Ok(Self::new(
            connection,
            model.workspace().clone(),
            Some(model),
            store_services,
            change_processor,
        ))
    }

    /// Create an object context from the metadata carried by the connection
    pub fn from_connection_model(
        connection: Arc<dyn DbConnection>,
        providers: &ProviderRegistry,
        change_processor: Arc<dyn ChangeProcessor>,
    ) -> Result<Self> {
        let workspace = connection.metadata_workspace().ok_or_else(|| {
            OrmError::Configuration(format!(
                "the connection '{}' does not carry model metadata",
                connection.type_name()
            ))
        })?;
        let store_services = providers.services(&connection.store_provider_invariant_name())?;
        Ok(Self::new(connection, workspace, None, store_services, change_processor))
    }

    fn new(
        connection: Arc<dyn DbConnection>,
        workspace: Arc<MetadataWorkspace>,
        model: Option<Arc<CompiledModel>>,
        store_services: Arc<dyn ProviderServices>,
        change_processor: Arc<dyn ChangeProcessor>,
    ) -> Self {
        Self {
            connection,
            model,
            workspace,
            store_services,
            change_processor,
            options: RwLock::new(ContextOptions::default()),
            entries: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> &Arc<dyn DbConnection> {
        &self.connection
    }

    /// The connection that talks to the store
    pub fn store_connection(&self) -> Arc<dyn DbConnection> {
        self.connection
            .store_connection()
            .unwrap_or_else(|| self.connection.clone())
    }

    /// The compiled model, unless the context was created from connection metadata
    pub fn model(&self) -> Option<&Arc<CompiledModel>> {
        self.model.as_ref()
    }

    pub fn workspace(&self) -> &Arc<MetadataWorkspace> {
        &self.workspace
    }

    pub fn store_services(&self) -> &Arc<dyn ProviderServices> {
        &self.store_services
    }

    pub fn options(&self) -> ContextOptions {
        *self.options.read()
    }

    pub fn set_lazy_loading_enabled(&self, enabled: bool) {
        self.options.write().lazy_loading_enabled = enabled;
    }

    pub fn set_proxy_creation_enabled(&self, enabled: bool) {
        self.options.write().proxy_creation_enabled = enabled;
    }

    pub fn set_use_consistent_null_reference_behavior(&self, enabled: bool) {
        self.options.write().use_consistent_null_reference_behavior = enabled;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn check_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(OrmError::ContextDisposed(self.workspace.container_name.clone()));
        }
        Ok(())
    }

    /// Entity set that holds `entity_type`, and the root type of that set
    pub fn entity_set_for(&self, entity_type: &str) -> Result<EntitySetTypePair> {
        self.workspace
            .entity_set_and_base_type_for_type(entity_type)
            .ok_or_else(|| OrmError::EntityTypeNotInModel(entity_type.to_string()))
    }

    fn track(
        &self,
        entity_type: &str,
        key: String,
        state: EntryState,
        values: serde_json::Value,
    ) -> Result<()> {
        self.check_not_disposed()?;
        let set = self.entity_set_for(entity_type)?;
        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|entry| entry.entity_set == set.entity_set.name && entry.key == key)
        {
            return Err(OrmError::EntityAlreadyTracked {
                entity_set: set.entity_set.name,
                key,
            });
        }
        entries.push(TrackedEntry {
            entity_set: set.entity_set.name,
            entity_type: entity_type.to_string(),
            key,
            state,
            original: values.clone(),
            current: values,
        });
        Ok(())
    }

    /// Track a new entity to be inserted
    pub fn add(
        &self,
        entity_type: &str,
        key: impl Into<String>,
        values: serde_json::Value,
    ) -> Result<()> {
        self.track(entity_type, key.into(), EntryState::Added, values)
    }

    /// Track an entity that already exists in the store
    pub fn attach(
        &self,
        entity_type: &str,
        key: impl Into<String>,
        values: serde_json::Value,
    ) -> Result<()> {
        self.track(entity_type, key.into(), EntryState::Unchanged, values)
    }

    fn with_entry<T>(
        &self,
        entity_type: &str,
        key: &str,
        f: impl FnOnce(&mut Vec<TrackedEntry>, usize) -> T,
    ) -> Result<T> {
        self.check_not_disposed()?;
        let set = self.entity_set_for(entity_type)?;
        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|entry| entry.entity_set == set.entity_set.name && entry.key == key)
            .ok_or_else(|| OrmError::EntityNotTracked {
                entity_type: entity_type.to_string(),
                key: key.to_string(),
            })?;
        Ok(f(&mut entries, index))
    }

    /// Replace the current values of a tracked entity. The state changes only
    /// when changes are detected.
    pub fn update(&self, entity_type: &str, key: &str, values: serde_json::Value) -> Result<()> {
        self.with_entry(entity_type, key, |entries, index| {
            entries[index].current = values;
        })
    }

    /// Mark a tracked entity for deletion; an added entity is simply detached
    pub fn remove(&self, entity_type: &str, key: &str) -> Result<()> {
        self.with_entry(entity_type, key, |entries, index| {
            if entries[index].state == EntryState::Added {
                entries.remove(index);
            } else {
                entries[index].state = EntryState::Deleted;
            }
        })
    }

    pub fn entry_state(&self, entity_type: &str, key: &str) -> Option<EntryState> {
        self.with_entry(entity_type, key, |entries, index| entries[index].state)
            .ok()
    }

    /// Mark unchanged entries whose values differ from their snapshot as
    /// modified. Returns the number of entries that changed state.
    pub fn detect_changes(&self) -> usize {
        let mut detected = 0;
        for entry in self.entries.lock().iter_mut() {
            if entry.state == EntryState::Unchanged && entry.current != entry.original {
                entry.state = EntryState::Modified;
                detected += 1;
            }
        }
        if detected > 0 {
            tracing::debug!(detected, "detected changes");
        }
        detected
    }

    /// Changes that a save would write
    pub fn pending_changes(&self) -> Vec<EntityChange> {
        self.entries
            .lock()
            .iter()
            .filter_map(TrackedEntry::to_change)
            .collect()
    }

    /// Forget deleted entries and make every other entry unchanged
    pub fn accept_all_changes(&self) {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.state != EntryState::Deleted);
        for entry in entries.iter_mut() {
            entry.state = EntryState::Unchanged;
            entry.original = entry.current.clone();
        }
    }

    /// Write pending changes through the change processor
    #[tracing::instrument(skip(self), fields(container = %self.workspace.container_name))]
    pub fn save_changes(&self, options: SaveOptions) -> Result<usize> {
        self.check_not_disposed()?;
        if options.detect_changes_before_save {
            self.detect_changes();
        }

        let changes = self.pending_changes();
        if changes.is_empty() {
            return Ok(0);
        }

        let store = self.store_connection();
        let saved = self
            .change_processor
            .process(store.as_ref(), &changes)
            .map_err(|e| {
                let error = OrmError::from(e);
                tracing::error!(error = %error, "saving changes failed");
                error
            })?;

        if options.accept_all_changes_after_save {
            self.accept_all_changes();
        }
        tracing::debug!(saved, "saved changes");
        Ok(saved)
    }

    pub fn database_exists(&self) -> Result<bool> {
        self.store_services
            .database_exists(self.store_connection().as_ref())
    }

    /// Create the database and the tables of the model
    pub fn create_database(&self) -> Result<()> {
        self.store_services
            .create_database(self.store_connection().as_ref(), &self.workspace)
    }

    pub fn delete_database(&self) -> Result<()> {
        self.store_services
            .delete_database(self.store_connection().as_ref())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.store_services
            .table_exists(self.store_connection().as_ref(), table)
    }

    pub fn read_model_hash(&self, context_key: &str) -> Result<Option<String>> {
        self.store_services
            .read_model_hash(self.store_connection().as_ref(), context_key)
    }

    pub fn write_model_hash(&self, context_key: &str, hash: &str) -> Result<()> {
        self.store_services
            .write_model_hash(self.store_connection().as_ref(), context_key, hash)
    }

    /// Stop tracking. The connection is owned by the internal connection and
    /// is left alone.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.entries.lock().clear();
        }
    }
}

impl std::fmt::Debug for ObjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContext")
            .field("container", &self.workspace.container_name)
            .field("model", &self.model.as_ref().map(|model| model.id()))
            .field("connection", &self.connection)
            .field("options", &self.options())
            .finish()
    }
}
