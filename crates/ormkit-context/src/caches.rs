//! Process-wide caches shared by every context of a [`ContextServices`](crate::ContextServices)
//!
//! Both maps hand out `Arc`ed lazies so the shard lock is released before a
//! model is built or a database is initialized. A failed build or
//! initialization leaves its entry in place to be retried.

use std::sync::Arc;

use dashmap::DashMap;
use ormkit_core::{CompiledModel, ModelCacheKey, ModelId, RetryAction, RetryLazy};

use crate::{InternalContext, LazyInternalContext};

/// Builds the model for a cache key, at most once successfully
pub type ModelFactory = RetryLazy<LazyInternalContext, Arc<CompiledModel>>;

/// Initializes a database, at most once successfully
pub type InitializationAction = RetryAction<dyn InternalContext>;

/// Compiled models keyed by context type and provider
#[derive(Default)]
pub struct ModelCache {
    entries: DashMap<ModelCacheKey, Arc<ModelFactory>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lazy model for `key`, inserting one built by `factory` if absent.
    ///
    /// `factory` only creates the lazy; the model itself is built on the
    /// first successful `get_value`.
    #[tracing::instrument(skip(self, factory), fields(context = %key.context_type(), provider = %key.provider_name()))]
    pub fn get_or_add(&self, key: ModelCacheKey, factory: impl FnOnce() -> ModelFactory) -> Arc<ModelFactory> {
        if let Some(existing) = self.entries.get(&key) {
            tracing::debug!(built = existing.is_value_created(), "model cache hit");
            return existing.value().clone();
        }

        tracing::debug!("model cache miss");
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::new(factory()))
            .value()
            .clone()
    }

    pub fn get(&self, key: &ModelCacheKey) -> Option<Arc<ModelFactory>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &ModelCacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Identifies an initialized database: the model and the connection it was
/// initialized through
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InitializationKey {
    pub model: Option<ModelId>,
    pub connection_key: String,
}

impl InitializationKey {
    pub fn new(model: Option<ModelId>, connection_key: impl Into<String>) -> Self {
        Self {
            model,
            connection_key: connection_key.into(),
        }
    }
}

/// Databases that have been, or are being, initialized in this process
#[derive(Default)]
pub struct InitializationRegistry {
    entries: DashMap<InitializationKey, Arc<InitializationAction>>,
}

impl InitializationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The action registered for `key`, inserting one built by `factory` if absent
    #[tracing::instrument(skip(self, factory), fields(model = ?key.model, connection_key = %key.connection_key))]
    pub fn get_or_add(
        &self,
        key: InitializationKey,
        factory: impl FnOnce() -> InitializationAction,
    ) -> Arc<InitializationAction> {
        self.entries
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!("registered initialization action");
                Arc::new(factory())
            })
            .value()
            .clone()
    }

    /// Forget `key` so that the next initialization runs again. An action
    /// already handed out keeps running.
    pub fn remove(&self, key: &InitializationKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            tracing::debug!(model = ?key.model, connection_key = %key.connection_key, "database marked not initialized");
        }
        removed
    }

    pub fn contains(&self, key: &InitializationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether the action for `key` has completed successfully
    pub fn is_initialized(&self, key: &InitializationKey) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.value().is_performed())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for InitializationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
