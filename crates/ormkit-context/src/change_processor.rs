//! Persistence of tracked changes

use std::sync::Arc;

use ormkit_core::{DbConnection, EntityChange, SaveError};
use ormkit_providers::ProviderRegistry;

/// Writes a batch of tracked changes to the store.
///
/// Implementations report raw update failures as [`SaveError::Update`];
/// the caller classifies them.
pub trait ChangeProcessor: Send + Sync {
    fn process(
        &self,
        store_connection: &dyn DbConnection,
        changes: &[EntityChange],
    ) -> Result<usize, SaveError>;
}

/// Hands changes to the store provider's services
#[derive(Debug)]
pub struct ProviderChangeProcessor {
    providers: Arc<ProviderRegistry>,
}

impl ProviderChangeProcessor {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

impl ChangeProcessor for ProviderChangeProcessor {
    fn process(
        &self,
        store_connection: &dyn DbConnection,
        changes: &[EntityChange],
    ) -> Result<usize, SaveError> {
        let services = self
            .providers
            .services(store_connection.provider_invariant_name())?;
        services.apply_changes(store_connection, changes)
    }
}
