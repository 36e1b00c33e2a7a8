//! Default connection factories
//!
//! A [`ConnectionFactory`] turns a name or connection string that did not
//! match any config entry into a connection, by convention.

use std::sync::Arc;

use ormkit_core::connection_string::treat_as_connection_string;
use ormkit_core::{
    AppConfig, ConnectionStringBuilder, DbConnection, DefaultConnectionFactorySettings, Result,
};
use ormkit_providers::ProviderRegistry;

/// Placeholder replaced by the connection name in a database template
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Factory creating connections from a name or connection string
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a connection, or `None` if the factory cannot handle the input
    fn create_connection(&self, name_or_connection_string: &str)
    -> Result<Option<Arc<dyn DbConnection>>>;
}

impl<F> ConnectionFactory for F
where
    F: Fn(&str) -> Result<Option<Arc<dyn DbConnection>>> + Send + Sync + 'static,
{
    fn create_connection(
        &self,
        name_or_connection_string: &str,
    ) -> Result<Option<Arc<dyn DbConnection>>> {
        self(name_or_connection_string)
    }
}

/// Creates connections from one provider. A connection string is applied
/// as-is; a name is written under the database keyword of the base
/// connection string.
pub struct ProviderConnectionFactory {
    providers: Arc<ProviderRegistry>,
    settings: DefaultConnectionFactorySettings,
}

impl ProviderConnectionFactory {
    pub fn new(providers: Arc<ProviderRegistry>, provider: impl Into<String>) -> Self {
        Self::from_settings(providers, DefaultConnectionFactorySettings::new(provider))
    }

    pub fn from_settings(
        providers: Arc<ProviderRegistry>,
        settings: DefaultConnectionFactorySettings,
    ) -> Self {
        Self {
            providers,
            settings,
        }
    }

    pub fn settings(&self) -> &DefaultConnectionFactorySettings {
        &self.settings
    }

    /// Connection string for a conventional name
    pub fn connection_string_for_name(&self, name: &str) -> Result<String> {
        let mut builder = ConnectionStringBuilder::parse(&self.settings.base_connection_string)?;
        builder.set(
            &self.settings.database_keyword,
            self.settings.database_template.replace(NAME_PLACEHOLDER, name),
        );
        Ok(builder.to_string())
    }
}

impl ConnectionFactory for ProviderConnectionFactory {
    #[tracing::instrument(skip(self, name_or_connection_string), fields(provider = %self.settings.provider))]
    fn create_connection(
        &self,
        name_or_connection_string: &str,
    ) -> Result<Option<Arc<dyn DbConnection>>> {
        let connection_string = if treat_as_connection_string(name_or_connection_string) {
            name_or_connection_string.to_string()
        } else {
            self.connection_string_for_name(name_or_connection_string)?
        };

        let connection = self.providers.create_connection(&self.settings.provider)?;
        connection.set_connection_string(&connection_string)?;
        tracing::debug!(database = %connection.database(), "created connection by convention");
        Ok(Some(connection))
    }
}

impl std::fmt::Debug for ProviderConnectionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConnectionFactory")
            .field("settings", &self.settings)
            .finish()
    }
}

/// Providers and the default connection factory a lazy connection resolves against
#[derive(Clone)]
pub struct ConnectionDependencies {
    providers: Arc<ProviderRegistry>,
    default_connection_factory: Option<Arc<dyn ConnectionFactory>>,
}

impl ConnectionDependencies {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            providers,
            default_connection_factory: None,
        }
    }

    /// Use this factory instead of the one described by the config
    pub fn with_default_connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.default_connection_factory = Some(factory);
        self
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// The explicitly set factory, or one built from the config's
    /// `default_connection_factory` section
    pub fn default_connection_factory(
        &self,
        config: &AppConfig,
    ) -> Option<Arc<dyn ConnectionFactory>> {
        if let Some(factory) = &self.default_connection_factory {
            return Some(factory.clone());
        }
        config.default_connection_factory().map(|settings| {
            Arc::new(ProviderConnectionFactory::from_settings(
                self.providers.clone(),
                settings.clone(),
            )) as Arc<dyn ConnectionFactory>
        })
    }
}

impl Default for ConnectionDependencies {
    fn default() -> Self {
        Self::new(Arc::new(ProviderRegistry::with_defaults()))
    }
}

impl std::fmt::Debug for ConnectionDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDependencies")
            .field("providers", &self.providers.list())
            .field(
                "has_default_connection_factory",
                &self.default_connection_factory.is_some(),
            )
            .finish()
    }
}
