//! Connections that carry their own model metadata

use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ormkit_core::connection_string::{
    METADATA_KEYWORD, PROVIDER_CONNECTION_STRING_KEYWORD, PROVIDER_KEYWORD,
};
use ormkit_core::{
    ConnectionState, ConnectionStringBuilder, DbConnection, ENTITY_CLIENT_PROVIDER,
    MetadataWorkspace, OrmError, Result,
};
use ormkit_providers::ProviderRegistry;
use parking_lot::RwLock;

/// Separator between metadata paths
const METADATA_PATH_SEPARATOR: char = '|';

/// The three parts of a metadata-bearing connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityConnectionStringParts {
    pub metadata: String,
    pub provider: String,
    pub provider_connection_string: String,
}

impl EntityConnectionStringParts {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let builder = ConnectionStringBuilder::parse(connection_string)?;
        let required = |keyword: &str| {
            builder
                .get(keyword)
                .map(str::to_string)
                .ok_or_else(|| {
                    OrmError::InvalidConnectionString(format!(
                        "metadata connection string is missing the '{keyword}' keyword"
                    ))
                })
        };

        Ok(Self {
            metadata: required(METADATA_KEYWORD)?,
            provider: required(PROVIDER_KEYWORD)?,
            provider_connection_string: required(PROVIDER_CONNECTION_STRING_KEYWORD)?,
        })
    }

    pub fn to_connection_string(&self) -> String {
        ConnectionStringBuilder::new()
            .with(METADATA_KEYWORD, self.metadata.clone())
            .with(PROVIDER_KEYWORD, self.provider.clone())
            .with(
                PROVIDER_CONNECTION_STRING_KEYWORD,
                self.provider_connection_string.clone(),
            )
            .to_string()
    }
}

/// Load and merge the JSON metadata files named by a `|`-separated path list
pub fn load_metadata(paths: &str) -> Result<MetadataWorkspace> {
    let mut workspace: Option<MetadataWorkspace> = None;
    for path in paths
        .split(METADATA_PATH_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        let content = std::fs::read_to_string(Path::new(path)).map_err(|e| {
            tracing::error!(path = %path, error = %e, "failed to read model metadata");
            e
        })?;
        let part: MetadataWorkspace = serde_json::from_str(&content)?;
        match workspace.as_mut() {
            Some(existing) => existing.merge(part),
            None => workspace = Some(part),
        }
    }

    workspace.ok_or_else(|| {
        OrmError::InvalidConnectionString("metadata connection string names no metadata".into())
    })
}

/// A connection wrapping a store connection together with the model
/// metadata describing it.
pub struct EntityConnection {
    connection_string: RwLock<String>,
    metadata_paths: String,
    workspace: Arc<MetadataWorkspace>,
    store: Arc<dyn DbConnection>,
    disposed: AtomicBool,
}

impl EntityConnection {
    /// Wrap a store connection with an in-memory workspace
    pub fn new(workspace: Arc<MetadataWorkspace>, store: Arc<dyn DbConnection>) -> Self {
        let metadata_paths = format!("res://{}", workspace.container_name);
        let parts = EntityConnectionStringParts {
            metadata: metadata_paths.clone(),
            provider: store.provider_invariant_name().to_string(),
            provider_connection_string: store.connection_string(),
        };
        Self {
            connection_string: RwLock::new(parts.to_connection_string()),
            metadata_paths,
            workspace,
            store,
            disposed: AtomicBool::new(false),
        }
    }

    /// Build a connection from a full metadata-bearing connection string,
    /// loading metadata files and creating the store connection from the
    /// registry.
    #[tracing::instrument(skip(connection_string, providers))]
    pub fn from_connection_string(
        connection_string: &str,
        providers: &ProviderRegistry,
    ) -> Result<Self> {
        let parts = EntityConnectionStringParts::parse(connection_string)?;
        let workspace = load_metadata(&parts.metadata)?;

        let store = providers.create_connection(&parts.provider)?;
        store.set_connection_string(&parts.provider_connection_string)?;

        tracing::debug!(
            provider = %parts.provider,
            container = %workspace.container_name,
            "created metadata connection"
        );

        Ok(Self {
            connection_string: RwLock::new(connection_string.to_string()),
            metadata_paths: parts.metadata,
            workspace: Arc::new(workspace),
            store,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn workspace(&self) -> &Arc<MetadataWorkspace> {
        &self.workspace
    }

    pub fn store(&self) -> &Arc<dyn DbConnection> {
        &self.store
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(OrmError::ConnectionDisposed(self.type_name().to_string()));
        }
        Ok(())
    }
}

impl DbConnection for EntityConnection {
    fn provider_invariant_name(&self) -> &str {
        ENTITY_CLIENT_PROVIDER
    }

    fn type_name(&self) -> &str {
        "EntityConnection"
    }

    fn connection_string(&self) -> String {
        self.connection_string.read().clone()
    }

    /// Point the store connection somewhere else. The metadata paths cannot change.
    fn set_connection_string(&self, connection_string: &str) -> Result<()> {
        self.ensure_not_disposed()?;
        let parts = EntityConnectionStringParts::parse(connection_string)?;
        if parts.metadata != self.metadata_paths {
            return Err(OrmError::InvalidConnectionString(format!(
                "metadata '{}' cannot be changed to '{}' on an existing connection",
                self.metadata_paths, parts.metadata
            )));
        }
        if !parts
            .provider
            .eq_ignore_ascii_case(self.store.provider_invariant_name())
        {
            return Err(OrmError::InvalidConnectionString(format!(
                "provider '{}' cannot be changed to '{}' on an existing connection",
                self.store.provider_invariant_name(),
                parts.provider
            )));
        }

        self.store
            .set_connection_string(&parts.provider_connection_string)?;
        *self.connection_string.write() = connection_string.to_string();
        Ok(())
    }

    fn database(&self) -> String {
        self.store.database()
    }

    fn data_source(&self) -> String {
        self.store.data_source()
    }

    fn state(&self) -> ConnectionState {
        self.store.state()
    }

    fn open(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        self.store.open()
    }

    fn close(&self) -> Result<()> {
        self.store.close()
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.store.dispose();
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn store_connection(&self) -> Option<Arc<dyn DbConnection>> {
        Some(self.store.clone())
    }

    fn metadata_workspace(&self) -> Option<Arc<MetadataWorkspace>> {
        Some(self.workspace.clone())
    }

    fn metadata_paths(&self) -> Option<String> {
        Some(self.metadata_paths.clone())
    }
}

impl std::fmt::Debug for EntityConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityConnection")
            .field("metadata", &self.metadata_paths)
            .field("container", &self.workspace.container_name)
            .field("store", &self.store.type_name())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
