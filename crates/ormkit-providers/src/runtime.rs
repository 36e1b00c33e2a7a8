//! Tokio runtime for async pass-through operations
//!
//! Async entry points of the runtime only move blocking work onto a blocking
//! thread pool. Callers that are not running inside a Tokio runtime get a
//! shared one.

use std::sync::OnceLock;
use tokio::runtime::{Handle, Runtime};

/// Global Tokio runtime for blocking pass-through work
static TOKIO_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Get or create the shared Tokio runtime.
///
/// # Panics
///
/// Panics if the runtime cannot be created.
fn shared_runtime() -> &'static Runtime {
    TOKIO_RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("ormkit-runtime")
            .build()
            .expect("Failed to create Tokio runtime for ormkit")
    })
}

/// Handle of the current runtime, or of the shared one when called outside Tokio
pub fn runtime_handle() -> Handle {
    Handle::try_current().unwrap_or_else(|_| shared_runtime().handle().clone())
}
