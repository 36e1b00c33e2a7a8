//! Keys of the model cache

use ormkit_core::{ModelCacheKey, Result};

use crate::InternalContext;

/// Decides which contexts share a compiled model
pub trait ModelCacheKeyFactory: Send + Sync {
    fn create(&self, context: &dyn InternalContext) -> Result<ModelCacheKey>;
}

/// Keys by context type, provider name and the schema the owner reports
#[derive(Debug, Default)]
pub struct DefaultModelCacheKeyFactory;

impl ModelCacheKeyFactory for DefaultModelCacheKeyFactory {
    fn create(&self, context: &dyn InternalContext) -> Result<ModelCacheKey> {
        ModelCacheKey::new(
            context.context_type(),
            context.provider_name()?,
            context.owner().model_schema(),
        )
    }
}
