//! The disposable-entity contract.
//!
//! [`Lifecycle`] is the composable base: an owner embeds one and routes its
//! liveness checks, busy scopes and teardown through it. [`Disposable<T>`]
//! packages the common case of a single value implementing [`Resource`].

use core::sync::atomic::Ordering;
use std::sync::Arc;

use super::coordinator::{BusyToken, DisposeCoordinator};
use crate::concurrency::{AtomicDisposalState, BusyCounter, DisposalState};
use crate::error::DisposeError;
use crate::tracking::{self, InstanceTracker, TrackingId};

/// Anything with a one-time release step.
pub trait Dispose {
    /// Releases the object. Idempotent with respect to the actual teardown.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Teardown`] to the caller that ran a failing teardown.
    fn dispose(&self) -> Result<(), DisposeError>;

    /// Returns `true` once disposal has been claimed.
    fn is_disposed(&self) -> bool;
}

impl<D: Dispose + ?Sized> Dispose for &D {
    fn dispose(&self) -> Result<(), DisposeError> {
        (**self).dispose()
    }

    fn is_disposed(&self) -> bool {
        (**self).is_disposed()
    }
}

impl<D: Dispose + ?Sized> Dispose for Box<D> {
    fn dispose(&self) -> Result<(), DisposeError> {
        (**self).dispose()
    }

    fn is_disposed(&self) -> bool {
        (**self).is_disposed()
    }
}

impl<D: Dispose + ?Sized> Dispose for Arc<D> {
    fn dispose(&self) -> Result<(), DisposeError> {
        (**self).dispose()
    }

    fn is_disposed(&self) -> bool {
        (**self).is_disposed()
    }
}

/// Owner-specific release logic.
///
/// Both methods take `&self`: teardown runs on whichever thread wins the
/// disposal race, while other threads may still hold references to the owner.
pub trait Resource {
    /// Releases resources owned through safe handles. Runs only on the explicit
    /// dispose path, never from drop glue.
    ///
    /// # Errors
    ///
    /// Any error is surfaced to the `dispose` caller as [`DisposeError::Teardown`].
    fn release_managed(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Releases resources that leak for good if skipped (raw handles, foreign
    /// allocations). Runs last on every path, including after
    /// [`release_managed`](Self::release_managed) failed.
    fn release_unmanaged(&self) {}

    /// Whether dropping an undisposed [`Disposable`] runs the backstop release.
    const NEEDS_FINALIZER: bool = false;
}

struct Registration {
    tracker: &'static dyn InstanceTracker,
    id: TrackingId,
    // The tracker holds the weak side; it dies with this lifecycle.
    _liveness: Arc<()>,
}

/// Runs the wrapped closure when dropped, unwinding included.
struct Deferred<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Deferred<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Disposal state, busy barrier and tracking registration for one entity.
pub struct Lifecycle {
    type_name: &'static str,
    state: AtomicDisposalState,
    busy: BusyCounter,
    registration: Option<Registration>,
}

impl Lifecycle {
    /// Creates a lifecycle for an entity of type `T`, registered with the global tracker.
    pub fn new<T: ?Sized>() -> Self {
        Self::with_tracker::<T>(tracking::global())
    }

    /// Creates a lifecycle registered with `tracker`, if it is tracking `T`.
    pub fn with_tracker<T: ?Sized>(tracker: &'static dyn InstanceTracker) -> Self {
        let type_name = core::any::type_name::<T>();
        let registration = if tracker.is_tracking(type_name) {
            let liveness = Arc::new(());
            tracker
                .on_register(Arc::downgrade(&liveness), type_name)
                .map(|id| Registration {
                    tracker,
                    id,
                    _liveness: liveness,
                })
        } else {
            None
        };
        Self {
            type_name,
            state: AtomicDisposalState::new(),
            busy: BusyCounter::new(),
            registration,
        }
    }

    /// Creates a lifecycle that never reports to a tracker.
    pub fn untracked<T: ?Sized>() -> Self {
        Self {
            type_name: core::any::type_name::<T>(),
            state: AtomicDisposalState::new(),
            busy: BusyCounter::new(),
            registration: None,
        }
    }

    /// Name of the owning type.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Current disposal state.
    #[inline]
    pub fn state(&self) -> DisposalState {
        self.state.load(Ordering::Acquire)
    }

    /// `true` once disposal has been claimed (`Disposing` or `Disposed`).
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.state().is_disposed_or_disposing()
    }

    /// Number of busy scopes currently open.
    #[inline]
    pub fn busy_count(&self) -> usize {
        self.busy.active()
    }

    /// The tracker's id for this entity, if it was registered.
    pub fn tracking_id(&self) -> Option<TrackingId> {
        self.registration.as_ref().map(|r| r.id)
    }

    /// Attaches a free-form diagnostic string to the tracker record.
    pub fn set_diagnostic_state(&self, state: impl Into<String>) {
        if let Some(r) = &self.registration {
            r.tracker.on_state(r.id, state.into());
        }
    }

    /// Guard for the top of any method that needs a live entity.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once disposal has been claimed.
    #[inline]
    pub fn ensure_not_disposed(&self) -> Result<(), DisposeError> {
        DisposeCoordinator::ensure_not_disposed(self.type_name, &self.state, &self.busy)
    }

    /// See [`DisposeCoordinator::enter_busy`].
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once disposal has been claimed.
    #[inline]
    pub fn enter_busy(&self) -> Result<(), DisposeError> {
        DisposeCoordinator::enter_busy(self.type_name, &self.state, &self.busy)
    }

    /// See [`DisposeCoordinator::exit_busy`].
    ///
    /// # Errors
    ///
    /// Returns an error if already disposed or if no scope is open.
    #[inline]
    pub fn exit_busy(&self) -> Result<(), DisposeError> {
        DisposeCoordinator::exit_busy(self.type_name, &self.state, &self.busy)
    }

    /// Opens a busy scope that ends when the token is released or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once disposal has been claimed.
    #[inline]
    pub fn busy_token(&self) -> Result<BusyToken<'_>, DisposeError> {
        DisposeCoordinator::busy_token(self.type_name, &self.state, &self.busy)
    }

    /// Runs the explicit teardown once.
    ///
    /// Order: `managed`, then tracker unregistration if `managed` succeeded,
    /// then `unmanaged`, which runs even when `managed` fails or panics.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Teardown`] carrying `managed`'s error.
    pub fn dispose<M, U>(&self, managed: M, unmanaged: U) -> Result<(), DisposeError>
    where
        M: FnOnce() -> anyhow::Result<()>,
        U: FnOnce(),
    {
        DisposeCoordinator::dispose(self.type_name, &self.state, &self.busy, |disposing| {
            self.teardown(disposing, managed, unmanaged)
        })
    }

    /// Backstop teardown for drop glue: runs only `unmanaged`, and only if the
    /// entity was never disposed. The tracker record is left in place so the
    /// missed disposal still shows up.
    pub fn finalize<U: FnOnce()>(&self, unmanaged: U) {
        let result = DisposeCoordinator::finalize(self.type_name, &self.state, &self.busy, |disposing| {
            self.teardown(disposing, || Ok(()), unmanaged)
        });
        debug_assert!(result.is_ok(), "backstop release of {} failed", self.type_name);
        #[cfg(feature = "tracing")]
        if let Err(error) = result {
            tracing::error!(type_name = self.type_name, error = %error, "backstop release failed");
        }
    }

    fn teardown<M, U>(&self, disposing: bool, managed: M, unmanaged: U) -> anyhow::Result<()>
    where
        M: FnOnce() -> anyhow::Result<()>,
        U: FnOnce(),
    {
        let _last = Deferred(Some(unmanaged));
        if disposing {
            managed()?;
            if let Some(r) = &self.registration {
                r.tracker.on_unregister(r.id, self.type_name);
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("type_name", &self.type_name)
            .field("state", &self.state())
            .field("busy", &self.busy.active())
            .field("tracking_id", &self.tracking_id())
            .finish()
    }
}

/// A value of type `T` guarded by a [`Lifecycle`].
///
/// ```rust
/// use disposal::{Dispose, Disposable, Resource};
///
/// struct Buffer(Vec<u8>);
/// impl Resource for Buffer {}
///
/// let buf = Disposable::untracked(Buffer(vec![0; 16]));
/// assert_eq!(buf.run(|b| b.0.len()).unwrap(), 16);
/// buf.dispose().unwrap();
/// assert!(buf.run(|b| b.0.len()).is_err());
/// ```
pub struct Disposable<T: Resource> {
    lifecycle: Lifecycle,
    pub(super) resource: T,
}

impl<T: Resource> Disposable<T> {
    /// Wraps `resource`, registering it with the global tracker.
    pub fn new(resource: T) -> Self {
        Self {
            lifecycle: Lifecycle::new::<T>(),
            resource,
        }
    }

    /// Wraps `resource`, registering it with `tracker`.
    pub fn with_tracker(resource: T, tracker: &'static dyn InstanceTracker) -> Self {
        Self {
            lifecycle: Lifecycle::with_tracker::<T>(tracker),
            resource,
        }
    }

    /// Wraps `resource` without tracking.
    pub fn untracked(resource: T) -> Self {
        Self {
            lifecycle: Lifecycle::untracked::<T>(),
            resource,
        }
    }

    /// The underlying lifecycle.
    #[inline]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Borrows the resource after checking liveness.
    ///
    /// The check is a snapshot; use [`run`](Self::run) when the borrow must not
    /// overlap with teardown.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once disposal has been claimed.
    #[inline]
    pub fn get(&self) -> Result<&T, DisposeError> {
        self.lifecycle.ensure_not_disposed()?;
        Ok(&self.resource)
    }

    /// Runs `f` inside a busy scope; disposal waits for it to return.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once disposal has been claimed.
    pub fn run<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, DisposeError> {
        let token = self.lifecycle.busy_token()?;
        let out = f(&self.resource);
        token.release()?;
        Ok(out)
    }

    /// Opens a busy scope around caller-managed work.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] once disposal has been claimed.
    #[inline]
    pub fn busy_token(&self) -> Result<BusyToken<'_>, DisposeError> {
        self.lifecycle.busy_token()
    }
}

impl<T: Resource> Dispose for Disposable<T> {
    fn dispose(&self) -> Result<(), DisposeError> {
        self.lifecycle.dispose(
            || self.resource.release_managed(),
            || self.resource.release_unmanaged(),
        )
    }

    #[inline]
    fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }
}

impl<T: Resource> Drop for Disposable<T> {
    fn drop(&mut self) {
        if T::NEEDS_FINALIZER {
            self.lifecycle.finalize(|| self.resource.release_unmanaged());
        }
    }
}

impl<T: Resource + core::fmt::Debug> core::fmt::Debug for Disposable<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Disposable")
            .field("lifecycle", &self.lifecycle)
            .field("resource", &self.resource)
            .finish()
    }
}
