//! Retry-on-failure one-time computations
//!
//! [`RetryLazy`] memoizes the first successful result of a factory and
//! [`RetryAction`] runs a side-effecting action until it succeeds once. Unlike
//! ordinary memoization a failed attempt is never cached: the error goes back
//! to the caller and the next call runs the factory or action again.
//!
//! Both types serialize callers on a lock scoped to the instance, so the
//! factory or action never runs concurrently with itself.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock};

use parking_lot::ReentrantMutex;

use crate::{OrmError, Result};

type Factory<I, T> = Arc<dyn Fn(&I) -> Result<T> + Send + Sync>;
type Action<I> = Arc<dyn Fn(&I) -> Result<()> + Send + Sync>;

/// Puts a taken factory or action back into its slot unless disarmed.
///
/// Covers both an `Err` return and a panic unwinding out of user code.
struct Rearm<'a, F> {
    slot: &'a RefCell<Option<F>>,
    pending: Option<F>,
}

impl<'a, F> Rearm<'a, F> {
    fn new(slot: &'a RefCell<Option<F>>, pending: F) -> Self {
        Self {
            slot,
            pending: Some(pending),
        }
    }

    fn disarm(&mut self) {
        self.pending = None;
    }
}

impl<F> Drop for Rearm<'_, F> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            *self.slot.borrow_mut() = Some(pending);
        }
    }
}

/// A lazily computed value whose factory is retried after failures.
///
/// The factory receives the input passed to [`RetryLazy::get_value`] so that
/// a retry can use fresh state (a new connection, for instance). Once a value
/// has been produced it is returned for every later call and the input is
/// ignored.
pub struct RetryLazy<I: ?Sized, T> {
    value: OnceLock<T>,
    factory: ReentrantMutex<RefCell<Option<Factory<I, T>>>>,
}

impl<I: ?Sized, T: Clone> RetryLazy<I, T> {
    /// Create a new lazy value from a factory
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&I) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            value: OnceLock::new(),
            factory: ReentrantMutex::new(RefCell::new(Some(Arc::new(factory)))),
        }
    }

    /// Get the value, running the factory if no attempt has succeeded yet.
    ///
    /// Returns [`OrmError::RecursiveLazyInitialization`] when called again
    /// from inside the factory on the same thread.
    pub fn get_value(&self, input: &I) -> Result<T> {
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }

        let guard = self.factory.lock();
        if let Some(value) = self.value.get() {
            return Ok(value.clone());
        }

        let factory = guard
            .borrow_mut()
            .take()
            .ok_or(OrmError::RecursiveLazyInitialization)?;
        let mut rearm = Rearm::new(&guard, Arc::clone(&factory));

        let value = factory(input)?;
        rearm.disarm();

        let value = self.value.get_or_init(|| value).clone();
        Ok(value)
    }

    /// Whether a value has been produced
    pub fn is_value_created(&self) -> bool {
        self.value.get().is_some()
    }
}

impl<I: ?Sized, T: std::fmt::Debug> std::fmt::Debug for RetryLazy<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryLazy")
            .field("value", &self.value.get())
            .finish()
    }
}

/// A side-effecting action that runs once successfully and is retried after failures.
///
/// The lock is reentrant and the action is removed from the instance before it
/// runs: when the action itself calls [`RetryAction::perform_action`] on the
/// same instance from the same thread the nested call does nothing.
pub struct RetryAction<I: ?Sized> {
    action: ReentrantMutex<RefCell<Option<Action<I>>>>,
}

impl<I: ?Sized> RetryAction<I> {
    /// Create a new action
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&I) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            action: ReentrantMutex::new(RefCell::new(Some(Arc::new(action)))),
        }
    }

    /// Run the action unless it has already succeeded
    pub fn perform_action(&self, input: &I) -> Result<()> {
        let guard = self.action.lock();
        let Some(action) = guard.borrow_mut().take() else {
            return Ok(());
        };
        let mut rearm = Rearm::new(&guard, Arc::clone(&action));

        action(input)?;
        rearm.disarm();
        Ok(())
    }

    /// Whether the action has completed successfully (or is currently running)
    pub fn is_performed(&self) -> bool {
        let guard = self.action.lock();
        let performed = guard.borrow().is_none();
        performed
    }
}

impl<I: ?Sized> std::fmt::Debug for RetryAction<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryAction").finish_non_exhaustive()
    }
}
