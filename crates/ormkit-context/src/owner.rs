//! The user-facing context type that owns an internal context

use ormkit_core::{EntityChange, Result};

use crate::ModelBuilder;

/// Implemented by user context types.
///
/// A context type describes its model in [`DbContext::on_model_creating`];
/// the runtime calls it at most once per model cache key per process.
pub trait DbContext: Send + Sync + 'static {
    /// Configure the model. Runs after the namespace and container
    /// conventions have been applied to `builder`.
    fn on_model_creating(&self, _builder: &mut ModelBuilder) -> Result<()> {
        Ok(())
    }

    /// Schema reported to the model cache key, so that one context type can
    /// map to several schemas with a model per schema
    fn model_schema(&self) -> Option<String> {
        None
    }

    /// Validate a pending change before it is saved
    fn validate_entry(&self, _change: &EntityChange) -> Result<()> {
        Ok(())
    }
}
