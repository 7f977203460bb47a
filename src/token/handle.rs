//! `ReleaseHandle`: a cloneable one-shot release obligation with value identity.

use core::hash::{Hash, Hasher};
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::once::{OnceAction, ReleaseAction};
use crate::error::DisposeError;
use crate::lifecycle::Dispose;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A lightweight release obligation identified by a process-unique id.
///
/// Equality and hashing use only the id assigned at construction: two handles
/// wrapping identical closures are different obligations, while clones of one
/// handle are the same obligation.
///
/// Clones share one action. Releasing any clone releases all of them; the
/// others become no-ops. Dropping a handle never runs the action.
#[derive(Clone)]
pub struct ReleaseHandle {
    id: u64,
    action: Arc<OnceAction>,
}

impl ReleaseHandle {
    /// Creates a handle around an infallible action.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::fallible(move || {
            action();
            Ok(())
        })
    }

    /// Creates a handle around an action that may fail.
    pub fn fallible<F>(action: F) -> Self
    where
        F: FnOnce() -> Result<(), DisposeError> + Send + 'static,
    {
        Self::from_boxed(Box::new(action))
    }

    /// Creates a handle from an optional boxed action.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Argument`] if `action` is `None`.
    pub fn from_option(action: Option<ReleaseAction>) -> Result<Self, DisposeError> {
        action
            .map(Self::from_boxed)
            .ok_or(DisposeError::Argument("action"))
    }

    fn from_boxed(action: ReleaseAction) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            action: Arc::new(OnceAction::new(action)),
        }
    }

    /// The identifier this handle compares by.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs the action if no clone has released it yet.
    ///
    /// # Errors
    ///
    /// Propagates the action's error to the first caller only.
    #[inline]
    pub fn release(&self) -> Result<(), DisposeError> {
        self.action.run()
    }

    /// Returns `true` once any clone has released the action.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.action.is_consumed()
    }
}

impl Dispose for ReleaseHandle {
    fn dispose(&self) -> Result<(), DisposeError> {
        self.release()
    }

    fn is_disposed(&self) -> bool {
        self.is_released()
    }
}

impl PartialEq for ReleaseHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ReleaseHandle {}

impl Hash for ReleaseHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl core::fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}
