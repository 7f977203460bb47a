//! `RefCounted`: defers teardown until the last reference is released.

use core::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use super::coordinator::BusyToken;
use super::entity::{Disposable, Dispose, Lifecycle, Resource};
use crate::error::DisposeError;
use crate::tracking::InstanceTracker;
use crate::token::ReleaseToken;

/// A [`Disposable`] whose teardown runs when its reference count reaches zero.
///
/// The creator holds the first reference. Each [`dispose`](Dispose::dispose)
/// drops one reference; only the call that brings the count to zero (or below)
/// performs the teardown. Surplus calls are absorbed by the underlying
/// one-time teardown.
///
/// ```rust
/// use std::sync::Arc;
/// use disposal::{Dispose, RefCounted, Resource};
///
/// struct Conn;
/// impl Resource for Conn {}
///
/// let conn = Arc::new(RefCounted::untracked(Conn));
/// let borrowed = conn.create_reference_token().unwrap();
/// conn.dispose().unwrap();
/// assert!(!conn.is_disposed());
/// borrowed.release().unwrap();
/// assert!(conn.is_disposed());
/// ```
pub struct RefCounted<T: Resource> {
    pub(super) inner: Disposable<T>,
    refs: AtomicIsize,
}

impl<T: Resource> RefCounted<T> {
    /// Wraps `resource` with one reference, registering it with the global tracker.
    pub fn new(resource: T) -> Self {
        Self::from_disposable(Disposable::new(resource))
    }

    /// Wraps `resource` with one reference, registering it with `tracker`.
    pub fn with_tracker(resource: T, tracker: &'static dyn InstanceTracker) -> Self {
        Self::from_disposable(Disposable::with_tracker(resource, tracker))
    }

    /// Wraps `resource` with one reference and no tracking.
    pub fn untracked(resource: T) -> Self {
        Self::from_disposable(Disposable::untracked(resource))
    }

    fn from_disposable(inner: Disposable<T>) -> Self {
        Self {
            inner,
            refs: AtomicIsize::new(1),
        }
    }

    /// Takes an additional reference.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] if teardown has been claimed, including
    /// a claim that races with this call.
    pub fn add_reference(&self) -> Result<(), DisposeError> {
        self.lifecycle().ensure_not_disposed()?;
        self.refs.fetch_add(1, Ordering::AcqRel);
        self.lifecycle().ensure_not_disposed()
    }

    /// Takes a reference and returns a token that gives it back once.
    ///
    /// However often the token is released, the count drops by exactly one.
    ///
    /// # Errors
    ///
    /// Same as [`add_reference`](Self::add_reference).
    pub fn create_reference_token(self: &Arc<Self>) -> Result<ReleaseToken, DisposeError>
    where
        T: Send + Sync + 'static,
    {
        self.add_reference()?;
        let this = Arc::clone(self);
        Ok(ReleaseToken::fallible(move || this.dispose()))
    }

    /// Current reference count. Zero or negative once torn down.
    #[inline]
    pub fn reference_count(&self) -> isize {
        self.refs.load(Ordering::Acquire)
    }

    /// The underlying lifecycle.
    #[inline]
    pub fn lifecycle(&self) -> &Lifecycle {
        self.inner.lifecycle()
    }

    /// Borrows the resource after checking liveness.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once teardown has been claimed.
    #[inline]
    pub fn get(&self) -> Result<&T, DisposeError> {
        self.inner.get()
    }

    /// Runs `f` inside a busy scope.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once teardown has been claimed.
    #[inline]
    pub fn run<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, DisposeError> {
        self.inner.run(f)
    }

    /// Opens a busy scope around caller-managed work.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once teardown has been claimed.
    #[inline]
    pub fn busy_token(&self) -> Result<BusyToken<'_>, DisposeError> {
        self.inner.busy_token()
    }
}

impl<T: Resource> Dispose for RefCounted<T> {
    /// Drops one reference; tears down when none remain.
    fn dispose(&self) -> Result<(), DisposeError> {
        if self.inner.is_disposed() {
            return Ok(());
        }
        if self.refs.fetch_sub(1, Ordering::AcqRel) - 1 <= 0 {
            self.inner.dispose()
        } else {
            Ok(())
        }
    }

    #[inline]
    fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl<T: Resource + core::fmt::Debug> core::fmt::Debug for RefCounted<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefCounted")
            .field("refs", &self.reference_count())
            .field("inner", &self.inner)
            .finish()
    }
}
