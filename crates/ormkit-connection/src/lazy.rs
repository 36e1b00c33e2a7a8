//! Connections resolved on first use from a name or connection string

use std::sync::Arc;

use ormkit_core::connection_string::{
    is_full_metadata_connection_string, strip_namespace, treat_as_connection_string,
    try_get_connection_name,
};
use ormkit_core::{
    AppConfig, ConnectionStringSettings, DbConnection, ENTITY_CLIENT_PROVIDER, OrmError, Result,
};
use parking_lot::{Mutex, RwLock};

use crate::internal::{self, ConnectionLifecycle, ConnectionSnapshot, ConnectionStringOrigin};
use crate::{ConnectionDependencies, DbConnectionInfo, EntityConnection, InternalConnection};

/// Find a config entry by exact name, then by the name without its namespace
pub fn find_connection_in_config(config: &AppConfig, name: &str) -> Option<ConnectionStringSettings> {
    config
        .connection_string(name)
        .or_else(|| strip_namespace(name).and_then(|short| config.connection_string(short)))
        .cloned()
}

fn is_entity_client(provider_name: &str) -> bool {
    provider_name.trim().eq_ignore_ascii_case(ENTITY_CLIENT_PROVIDER)
}

/// Outcome of resolving a lazy connection
struct Resolved {
    connection: Arc<dyn DbConnection>,
    origin: ConnectionStringOrigin,
    name: Option<String>,
    snapshot: ConnectionSnapshot,
}

impl Resolved {
    fn new(
        connection: Arc<dyn DbConnection>,
        origin: ConnectionStringOrigin,
        name: Option<String>,
    ) -> Self {
        let snapshot = ConnectionSnapshot::take(connection.as_ref());
        Self {
            connection,
            origin,
            name,
            snapshot,
        }
    }
}

/// A connection created on first use.
///
/// The input is resolved in this order:
///
/// 1. a [`DbConnectionInfo`], if one was given
/// 2. a bare name or `name=...`, looked up in the config by exact name and
///    then without its namespace
/// 3. `name=...` that was not found is an error
/// 4. a full metadata connection string becomes an [`EntityConnection`]
/// 5. a connection string is applied to a connection of the explicitly set
///    provider, if any
/// 6. otherwise the default connection factory is asked
///
/// The resolved connection is owned: [`InternalConnection::dispose`]
/// releases it and returns to [`ConnectionLifecycle::Uninitialized`], after
/// which the next access resolves again.
pub struct LazyInternalConnection {
    name_or_connection_string: String,
    connection_info: Option<DbConnectionInfo>,
    dependencies: ConnectionDependencies,
    app_config: RwLock<Arc<AppConfig>>,
    provider_name: RwLock<Option<String>>,
    resolved: Mutex<Option<Resolved>>,
    lifecycle: RwLock<ConnectionLifecycle>,
}

impl LazyInternalConnection {
    pub fn new(
        name_or_connection_string: impl Into<String>,
        dependencies: ConnectionDependencies,
        app_config: Arc<AppConfig>,
    ) -> Self {
        Self {
            name_or_connection_string: name_or_connection_string.into(),
            connection_info: None,
            dependencies,
            app_config: RwLock::new(app_config),
            provider_name: RwLock::new(None),
            resolved: Mutex::new(None),
            lifecycle: RwLock::new(ConnectionLifecycle::Uninitialized),
        }
    }

    /// A connection resolved from a [`DbConnectionInfo`]
    pub fn from_connection_info(
        connection_info: DbConnectionInfo,
        dependencies: ConnectionDependencies,
        app_config: Arc<AppConfig>,
    ) -> Self {
        let mut connection = Self::new(String::new(), dependencies, app_config);
        connection.connection_info = Some(connection_info);
        connection
    }

    pub fn name_or_connection_string(&self) -> &str {
        &self.name_or_connection_string
    }

    pub fn connection_info(&self) -> Option<&DbConnectionInfo> {
        self.connection_info.as_ref()
    }

    pub fn dependencies(&self) -> &ConnectionDependencies {
        &self.dependencies
    }

    pub fn is_initialized(&self) -> bool {
        self.resolved.lock().is_some()
    }

    fn set_lifecycle(&self, lifecycle: ConnectionLifecycle) {
        *self.lifecycle.write() = lifecycle;
    }

    /// Run `f` against the resolved connection, resolving it first if needed
    fn with_resolved<R>(&self, f: impl FnOnce(&mut Resolved) -> R) -> Result<R> {
        let mut guard = self.resolved.lock();
        let resolved = match guard.take() {
            Some(resolved) => resolved,
            None => {
                self.set_lifecycle(ConnectionLifecycle::Resolving);
                match self.resolve() {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        self.set_lifecycle(ConnectionLifecycle::Uninitialized);
                        tracing::error!(error = %e, "failed to resolve connection");
                        return Err(e);
                    }
                }
            }
        };
        let resolved = guard.insert(resolved);
        self.set_lifecycle(ConnectionLifecycle::Ready);
        Ok(f(resolved))
    }

    #[tracing::instrument(skip(self))]
    fn resolve(&self) -> Result<Resolved> {
        let config = self.app_config();

        if let Some(info) = &self.connection_info {
            let settings = info.resolve(&config)?;
            let connection = self.connection_from_settings(&settings)?;
            let name = Some(settings.name).filter(|name| !name.is_empty());
            tracing::debug!(connection_name = ?name, "resolved connection from connection info");
            return Ok(Resolved::new(
                connection,
                ConnectionStringOrigin::DbContextInfo,
                name,
            ));
        }

        let input = self.name_or_connection_string.as_str();
        let name = try_get_connection_name(input);

        if let Some(name) = &name
            && let Some(settings) = find_connection_in_config(&config, name)
        {
            let connection = self.connection_from_settings(&settings)?;
            tracing::debug!(connection_name = %settings.name, "resolved connection from config");
            return Ok(Resolved::new(
                connection,
                ConnectionStringOrigin::Configuration,
                Some(settings.name),
            ));
        }

        if treat_as_connection_string(input) {
            if let Some(name) = name {
                return Err(OrmError::ConnectionStringNotFound(name));
            }

            let connection: Arc<dyn DbConnection> = if is_full_metadata_connection_string(input) {
                Arc::new(EntityConnection::from_connection_string(
                    input,
                    self.dependencies.providers(),
                )?)
            } else if let Some(provider) = self.provider_name.read().clone() {
                self.connection_from_provider(&provider, input)?
            } else {
                self.connection_from_default_factory(&config, input)?
            };
            tracing::debug!("resolved connection from connection string");
            return Ok(Resolved::new(
                connection,
                ConnectionStringOrigin::UserCode,
                None,
            ));
        }

        let connection = self.connection_from_default_factory(&config, input)?;
        tracing::debug!(connection_name = %input, "resolved connection by convention");
        Ok(Resolved::new(
            connection,
            ConnectionStringOrigin::Convention,
            None,
        ))
    }

    fn connection_from_settings(
        &self,
        settings: &ConnectionStringSettings,
    ) -> Result<Arc<dyn DbConnection>> {
        let provider = settings.provider_name.trim();
        if provider.is_empty() {
            return Err(OrmError::ProviderNameMissing(settings.name.clone()));
        }
        if is_entity_client(provider) {
            return Ok(Arc::new(EntityConnection::from_connection_string(
                &settings.connection_string,
                self.dependencies.providers(),
            )?));
        }
        self.connection_from_provider(provider, &settings.connection_string)
    }

    fn connection_from_provider(
        &self,
        provider: &str,
        connection_string: &str,
    ) -> Result<Arc<dyn DbConnection>> {
        let connection = self.dependencies.providers().create_connection(provider)?;
        connection.set_connection_string(connection_string)?;
        Ok(connection)
    }

    fn connection_from_default_factory(
        &self,
        config: &AppConfig,
        name_or_connection_string: &str,
    ) -> Result<Arc<dyn DbConnection>> {
        let factory = self
            .dependencies
            .default_connection_factory(config)
            .ok_or_else(|| {
                OrmError::NoDefaultConnectionFactory(name_or_connection_string.to_string())
            })?;
        factory
            .create_connection(name_or_connection_string)?
            .ok_or_else(|| {
                OrmError::ConnectionFactoryReturnedNoConnection(
                    name_or_connection_string.to_string(),
                )
            })
    }
}

impl InternalConnection for LazyInternalConnection {
    fn connection(&self) -> Result<Arc<dyn DbConnection>> {
        self.with_resolved(|resolved| resolved.connection.clone())
    }

    fn connection_key(&self) -> Result<String> {
        self.with_resolved(|resolved| {
            resolved.snapshot.refresh(resolved.connection.as_ref());
            internal::connection_key(
                resolved.connection.as_ref(),
                resolved.snapshot.original_connection_string(),
            )
        })
    }

    fn connection_has_model(&self) -> Result<bool> {
        if let Some(resolved) = self.resolved.lock().as_ref() {
            return Ok(resolved.connection.metadata_workspace().is_some());
        }

        let config = self.app_config();
        if let Some(info) = &self.connection_info {
            return Ok(is_entity_client(&info.resolve(&config)?.provider_name));
        }

        let input = self.name_or_connection_string.as_str();
        if let Some(name) = try_get_connection_name(input) {
            return match find_connection_in_config(&config, &name) {
                Some(settings) => Ok(is_entity_client(&settings.provider_name)),
                None if treat_as_connection_string(input) => {
                    Err(OrmError::ConnectionStringNotFound(name))
                }
                None => Ok(false),
            };
        }

        Ok(is_full_metadata_connection_string(input))
    }

    fn connection_string_origin(&self) -> Result<ConnectionStringOrigin> {
        self.with_resolved(|resolved| resolved.origin)
    }

    fn connection_string_name(&self) -> Result<Option<String>> {
        self.with_resolved(|resolved| resolved.name.clone())
    }

    fn original_connection_string(&self) -> Result<String> {
        self.with_resolved(|resolved| {
            if resolved.snapshot.refresh(resolved.connection.as_ref()) {
                tracing::debug!("connection moved; original connection string re-taken");
            }
            resolved.snapshot.original_connection_string().to_string()
        })
    }

    fn provider_name(&self) -> Result<String> {
        if let Some(provider) = self.provider_name.read().clone() {
            return Ok(provider);
        }
        Ok(self.connection()?.store_provider_invariant_name())
    }

    fn set_provider_name(&self, provider_name: Option<String>) {
        *self.provider_name.write() = provider_name;
    }

    fn app_config(&self) -> Arc<AppConfig> {
        self.app_config.read().clone()
    }

    fn set_app_config(&self, config: Arc<AppConfig>) {
        *self.app_config.write() = config;
    }

    fn lifecycle(&self) -> ConnectionLifecycle {
        *self.lifecycle.read()
    }

    fn dispose(&self) {
        let resolved = self.resolved.lock().take();
        if let Some(resolved) = resolved {
            resolved.connection.dispose();
            tracing::debug!(origin = %resolved.origin, "disposed lazily created connection");
        }
        self.set_lifecycle(ConnectionLifecycle::Uninitialized);
    }
}

impl std::fmt::Debug for LazyInternalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyInternalConnection")
            .field("connection_info", &self.connection_info)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
