//! Settings applied to a context from outside, before it is first used

use std::sync::Arc;

use ormkit_connection::DbConnectionInfo;
use ormkit_core::{AppConfig, DbProviderInfo};

use crate::OnModelCreating;

/// Configuration a tool hands to a context before using it: a different
/// config, connection, provider or model hook.
///
/// Applying one to a context turns its database initializer off.
#[derive(Clone, Default)]
pub struct DbContextInfo {
    connection_info: Option<DbConnectionInfo>,
    model_provider_info: Option<DbProviderInfo>,
    app_config: Option<Arc<AppConfig>>,
    on_model_creating: Option<OnModelCreating>,
}

impl DbContextInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_info(mut self, connection_info: DbConnectionInfo) -> Self {
        self.connection_info = Some(connection_info);
        self
    }

    pub fn with_model_provider_info(mut self, provider_info: DbProviderInfo) -> Self {
        self.model_provider_info = Some(provider_info);
        self
    }

    pub fn with_app_config(mut self, config: Arc<AppConfig>) -> Self {
        self.app_config = Some(config);
        self
    }

    pub fn with_on_model_creating(mut self, hook: OnModelCreating) -> Self {
        self.on_model_creating = Some(hook);
        self
    }

    pub fn connection_info(&self) -> Option<&DbConnectionInfo> {
        self.connection_info.as_ref()
    }

    pub fn model_provider_info(&self) -> Option<&DbProviderInfo> {
        self.model_provider_info.as_ref()
    }

    pub fn app_config(&self) -> Option<&Arc<AppConfig>> {
        self.app_config.as_ref()
    }

    pub fn on_model_creating(&self) -> Option<&OnModelCreating> {
        self.on_model_creating.as_ref()
    }
}

impl std::fmt::Debug for DbContextInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbContextInfo")
            .field("connection_info", &self.connection_info)
            .field("model_provider_info", &self.model_provider_info)
            .field("has_app_config", &self.app_config.is_some())
            .field("has_on_model_creating", &self.on_model_creating.is_some())
            .finish()
    }
}
