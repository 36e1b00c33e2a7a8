//! Application configuration: named connection strings, the default
//! connection factory, and per-context initializer settings

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Prefix of the legacy `app_settings` key naming an initializer for a context type
pub const INITIALIZER_APP_SETTING_PREFIX: &str = "DatabaseInitializerForType ";

/// Initializer value meaning "do not initialize"
pub const DISABLED_INITIALIZER: &str = "Disabled";

/// A named connection string from the application config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStringSettings {
    /// Filled in from the table key when loaded
    #[serde(skip)]
    pub name: String,
    pub connection_string: String,
    #[serde(default)]
    pub provider_name: String,
}

impl ConnectionStringSettings {
    pub fn new(
        name: impl Into<String>,
        connection_string: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            connection_string: connection_string.into(),
            provider_name: provider_name.into(),
        }
    }
}

/// Settings for the connection factory used when no named connection matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultConnectionFactorySettings {
    pub provider: String,
    /// Keyword receiving the connection name, e.g. "Data Source"
    #[serde(default = "default_database_keyword")]
    pub database_keyword: String,
    #[serde(default)]
    pub base_connection_string: String,
    /// Value written under `database_keyword`; `{name}` is replaced by the connection name
    #[serde(default = "default_database_template")]
    pub database_template: String,
}

impl DefaultConnectionFactorySettings {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            database_keyword: default_database_keyword(),
            base_connection_string: String::new(),
            database_template: default_database_template(),
        }
    }

    pub fn with_database_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.database_keyword = keyword.into();
        self
    }

    pub fn with_base_connection_string(mut self, base: impl Into<String>) -> Self {
        self.base_connection_string = base.into();
        self
    }

    pub fn with_database_template(mut self, template: impl Into<String>) -> Self {
        self.database_template = template.into();
        self
    }
}

fn default_database_keyword() -> String {
    "Data Source".to_string()
}

fn default_database_template() -> String {
    "{name}".to_string()
}

/// Per-context settings from the `contexts` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSettings {
    #[serde(default)]
    pub disable_database_initialization: bool,
    #[serde(default)]
    pub database_initializer: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    connection_strings: BTreeMap<String, ConnectionStringSettings>,
    #[serde(default)]
    default_connection_factory: Option<DefaultConnectionFactorySettings>,
    #[serde(default)]
    contexts: BTreeMap<String, ContextSettings>,
    #[serde(default)]
    app_settings: BTreeMap<String, String>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(content)?;
        for (name, settings) in config.connection_strings.iter_mut() {
            settings.name = name.clone();
        }
        tracing::debug!(
            connection_strings = config.connection_strings.len(),
            contexts = config.contexts.len(),
            "loaded application config"
        );
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn with_connection_string(
        mut self,
        name: impl Into<String>,
        connection_string: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        let settings = ConnectionStringSettings::new(name, connection_string, provider_name);
        self.connection_strings
            .insert(settings.name.clone(), settings);
        self
    }

    pub fn with_default_connection_factory(
        mut self,
        settings: DefaultConnectionFactorySettings,
    ) -> Self {
        self.default_connection_factory = Some(settings);
        self
    }

    pub fn with_context_settings(
        mut self,
        context_type: impl Into<String>,
        settings: ContextSettings,
    ) -> Self {
        self.contexts.insert(context_type.into(), settings);
        self
    }

    pub fn with_app_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.app_settings.insert(key.into(), value.into());
        self
    }

    /// Named connection string, matched exactly
    pub fn connection_string(&self, name: &str) -> Option<&ConnectionStringSettings> {
        self.connection_strings.get(name)
    }

    pub fn connection_strings(&self) -> impl Iterator<Item = &ConnectionStringSettings> {
        self.connection_strings.values()
    }

    pub fn default_connection_factory(&self) -> Option<&DefaultConnectionFactorySettings> {
        self.default_connection_factory.as_ref()
    }

    /// Settings for a context type, keyed by its dotted database name
    pub fn context_settings(&self, context_type: &str) -> Option<&ContextSettings> {
        self.contexts.get(context_type)
    }

    pub fn app_setting(&self, key: &str) -> Option<&str> {
        self.app_settings.get(key).map(String::as_str)
    }

    /// Initializer named by the legacy `app_settings` key for a context type
    pub fn legacy_initializer(&self, context_type: &str) -> Option<&str> {
        self.app_setting(&format!("{INITIALIZER_APP_SETTING_PREFIX}{context_type}"))
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}
