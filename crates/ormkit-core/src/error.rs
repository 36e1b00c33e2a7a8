//! Error types for ormkit

use thiserror::Error;

use crate::update::DbUpdateError;

/// Core error type for ormkit operations
#[derive(Error, Debug)]
pub enum OrmError {
    #[error("No connection string named '{0}' could be found in the application config")]
    ConnectionStringNotFound(String),

    #[error(
        "The connection string '{0}' in the application config does not contain the required provider_name"
    )]
    ProviderNameMissing(String),

    #[error("No provider is registered with the invariant name '{0}'")]
    ProviderNotFound(String),

    #[error("No default connection factory is configured to create a connection for '{0}'")]
    NoDefaultConnectionFactory(String),

    #[error("The default connection factory did not return a connection for '{0}'")]
    ConnectionFactoryReturnedNoConnection(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error(
        "The context '{0}' was created with a compiled model, but its connection carries its own model metadata"
    )]
    ConnectionHasModel(String),

    #[error(
        "Cannot replace a connection that carries model metadata with a plain store connection"
    )]
    CannotReplaceEntityConnectionWithStoreConnection,

    #[error(
        "Cannot replace a plain store connection with a connection that carries model metadata"
    )]
    CannotReplaceStoreConnectionWithEntityConnection,

    #[error("The connection of context '{0}' cannot be replaced after the context has been initialized")]
    ConnectionReplacedAfterInitialization(String),

    #[error("The context '{0}' cannot be used while the model is being created")]
    ContextUsedInModelCreating(String),

    #[error("A lazily computed value was requested again while it was being computed on the same thread")]
    RecursiveLazyInitialization,

    #[error("The context '{0}' has been disposed")]
    ContextDisposed(String),

    #[error("The connection '{0}' has been disposed")]
    ConnectionDisposed(String),

    #[error(
        "The model was built for provider '{model_provider}' but the connection uses provider '{connection_provider}'"
    )]
    ProviderMismatch {
        model_provider: String,
        connection_provider: String,
    },

    #[error(
        "The model backing the '{0}' context has changed since the database was created"
    )]
    ModelIncompatible(String),

    #[error("Model compatibility cannot be checked for '{0}' because the database does not contain model metadata")]
    NoModelMetadata(String),

    #[error("The entity type '{0}' is not part of the model for the current context")]
    EntityTypeNotInModel(String),

    #[error("Model building failed: {0}")]
    ModelBuild(String),

    #[error("An entity with key '{key}' is already tracked in the entity set '{entity_set}'")]
    EntityAlreadyTracked { entity_set: String, key: String },

    #[error("No entity of type '{entity_type}' with key '{key}' is tracked")]
    EntityNotTracked { entity_type: String, key: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("The database '{0}' cannot be created because it already exists")]
    DatabaseAlreadyExists(String),

    #[error("An error occurred while initializing the database: {0}")]
    DatabaseInitialization(#[source] Box<OrmError>),

    #[error("Unknown database initializer '{0}'")]
    UnknownInitializer(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Update(#[from] DbUpdateError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Whether the error comes from talking to the data store rather than from
    /// a programming or configuration mistake.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            OrmError::Connection(_) | OrmError::Data(_) | OrmError::Provider(_) | OrmError::Update(_)
        )
    }
}

/// Result type alias for ormkit operations
pub type Result<T> = std::result::Result<T, OrmError>;
