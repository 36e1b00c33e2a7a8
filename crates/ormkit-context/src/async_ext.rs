//! Async entry points
//!
//! The runtime is blocking. These wrappers only move a call onto Tokio's
//! blocking pool so it can be awaited from async code.

use std::sync::Arc;

use async_trait::async_trait;
use ormkit_core::{OrmError, Result};
use ormkit_providers::runtime_handle;

use crate::InternalContext;

#[async_trait]
pub trait InternalContextAsyncExt {
    /// [`InternalContext::initialize`] on the blocking pool
    async fn initialize_async(&self) -> Result<()>;

    /// [`InternalContext::save_changes`] on the blocking pool
    async fn save_changes_async(&self) -> Result<usize>;
}

#[async_trait]
impl<T> InternalContextAsyncExt for Arc<T>
where
    T: InternalContext + ?Sized + 'static,
{
    async fn initialize_async(&self) -> Result<()> {
        let context = Arc::clone(self);
        run_blocking(move || context.initialize()).await
    }

    async fn save_changes_async(&self) -> Result<usize> {
        let context = Arc::clone(self);
        run_blocking(move || context.save_changes()).await
    }
}

async fn run_blocking<R>(f: impl FnOnce() -> Result<R> + Send + 'static) -> Result<R>
where
    R: Send + 'static,
{
    runtime_handle().spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = %e, "blocking task failed");
        OrmError::Other(format!("blocking task failed: {e}"))
    })?
}
