//! `DisposeCoordinator`: one-time, concurrency-safe teardown plus a busy barrier.
//!
//! The coordinator owns no state. Every operation takes the caller's
//! [`AtomicDisposalState`] and [`BusyCounter`] explicitly, so any type can
//! participate by embedding the two cells; see [`Lifecycle`](super::Lifecycle)
//! for the ready-made composition.
//!
//! ## Protocol
//!
//! - `dispose`: no-op once `Disposed`. Otherwise spins until no busy operation
//!   is in flight, closes the busy gate while the count still reads zero (or
//!   drains again if an entrant slipped in), and only then claims
//!   `Undisposed → Disposing` and seals the gate. The winner runs the teardown
//!   and finally marks `Disposed`, even if the teardown fails or panics. Callers
//!   that find the transition already claimed spin until they observe `Disposed`
//!   and return `Ok(())`.
//! - `enter_busy` / `exit_busy`: bracket a unit of work. While `dispose` is
//!   draining, the entity is still live: guards pass and busy scopes nest. Work
//!   that tries to enter after the claim fails with [`DisposeError::Disposed`].
//!
//! The drain has no timeout, and a steady stream of overlapping busy scopes
//! holds the disposer off until the stream stops. A thread must not call
//! `dispose` on an entity while it is itself inside one of that entity's busy
//! scopes: the drain would wait on its own scope forever. Calling `dispose`
//! again from inside the teardown is fine and returns at once.

use core::cell::RefCell;
use core::sync::atomic::Ordering;

use crossbeam_utils::Backoff;

use crate::concurrency::spin::spin_until;
use crate::concurrency::{AtomicDisposalState, BusyCounter, DisposalState};
use crate::error::DisposeError;

thread_local! {
    /// State cells whose teardown is running on this thread.
    static TEARING_DOWN: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn cell_key(state: &AtomicDisposalState) -> usize {
    state as *const AtomicDisposalState as usize
}

fn is_tearing_down_here(state: &AtomicDisposalState) -> bool {
    let key = cell_key(state);
    TEARING_DOWN.with(|cells| cells.borrow().contains(&key))
}

/// Marks the state `Disposed` and forgets the reentrancy record on every exit
/// path, unwinding included.
struct TeardownScope<'a> {
    state: &'a AtomicDisposalState,
}

impl<'a> TeardownScope<'a> {
    fn enter(state: &'a AtomicDisposalState) -> Self {
        let key = cell_key(state);
        TEARING_DOWN.with(|cells| cells.borrow_mut().push(key));
        Self { state }
    }
}

impl Drop for TeardownScope<'_> {
    fn drop(&mut self) {
        let key = cell_key(self.state);
        TEARING_DOWN.with(|cells| {
            let mut cells = cells.borrow_mut();
            if let Some(pos) = cells.iter().rposition(|&k| k == key) {
                cells.swap_remove(pos);
            }
        });
        self.state.mark_disposed();
    }
}

/// Stateless entry points of the disposal protocol.
pub struct DisposeCoordinator;

impl DisposeCoordinator {
    /// Runs `teardown(true)` exactly once across all concurrent and repeated callers.
    ///
    /// Blocks (spinning) until in-flight busy operations have drained, then
    /// claims the transition; blocks while another thread's teardown is running. Only the caller that performed the teardown
    /// can observe its failure; every other call returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Teardown`] if `teardown` fails. The state is
    /// `Disposed` regardless.
    pub fn dispose<F>(
        type_name: &'static str,
        state: &AtomicDisposalState,
        busy: &BusyCounter,
        teardown: F,
    ) -> Result<(), DisposeError>
    where
        F: FnOnce(bool) -> anyhow::Result<()>,
    {
        Self::run_once(type_name, state, busy, true, teardown)
    }

    /// Backstop entry point for drop glue: runs `teardown(false)` if nobody
    /// disposed the entity explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Teardown`] if `teardown` fails.
    pub fn finalize<F>(
        type_name: &'static str,
        state: &AtomicDisposalState,
        busy: &BusyCounter,
        teardown: F,
    ) -> Result<(), DisposeError>
    where
        F: FnOnce(bool) -> anyhow::Result<()>,
    {
        Self::run_once(type_name, state, busy, false, teardown)
    }

    fn run_once<F>(
        type_name: &'static str,
        state: &AtomicDisposalState,
        busy: &BusyCounter,
        disposing: bool,
        teardown: F,
    ) -> Result<(), DisposeError>
    where
        F: FnOnce(bool) -> anyhow::Result<()>,
    {
        if state.load(Ordering::Acquire) == DisposalState::Disposed {
            return Ok(());
        }
        if is_tearing_down_here(state) {
            return Ok(());
        }

        let backoff = Backoff::new();
        loop {
            if state.load(Ordering::Acquire).is_disposed_or_disposing() {
                return Self::await_disposed(state);
            }
            busy.wait_idle();
            if busy.try_close() {
                break;
            }
            backoff.snooze();
        }

        // Nothing is in flight and entrants are held at the gate.
        if !state.try_claim() {
            busy.seal();
            return Self::await_disposed(state);
        }
        busy.seal();

        let _scope = TeardownScope::enter(state);
        teardown(disposing).map_err(|source| DisposeError::Teardown { type_name, source })
    }

    fn await_disposed(state: &AtomicDisposalState) -> Result<(), DisposeError> {
        spin_until(|| state.load(Ordering::Acquire) == DisposalState::Disposed);
        Ok(())
    }

    /// Fails if the entity is disposed, mid-disposal, or its busy gate is sealed.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`].
    #[inline]
    pub fn ensure_not_disposed(
        type_name: &'static str,
        state: &AtomicDisposalState,
        busy: &BusyCounter,
    ) -> Result<(), DisposeError> {
        if state.load(Ordering::Acquire).is_disposed_or_disposing() || busy.is_locked() {
            return Err(DisposeError::Disposed { type_name });
        }
        Ok(())
    }

    /// Registers an in-flight operation. Must be paired with [`exit_busy`](Self::exit_busy).
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] if disposal has been claimed, including
    /// a claim that lands while this call is running.
    #[inline]
    pub fn enter_busy(
        type_name: &'static str,
        state: &AtomicDisposalState,
        busy: &BusyCounter,
    ) -> Result<(), DisposeError> {
        Self::ensure_not_disposed(type_name, state, busy)?;
        if !busy.try_enter() {
            return Err(DisposeError::Disposed { type_name });
        }
        if state.load(Ordering::SeqCst).is_disposed_or_disposing() {
            busy.exit();
            return Err(DisposeError::Disposed { type_name });
        }
        Ok(())
    }

    /// Unregisters an in-flight operation.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Disposed`] if the entity is already disposed, or
    /// [`DisposeError::Argument`] if there is no matching `enter_busy`.
    #[inline]
    pub fn exit_busy(
        type_name: &'static str,
        state: &AtomicDisposalState,
        busy: &BusyCounter,
    ) -> Result<(), DisposeError> {
        if state.load(Ordering::Acquire) == DisposalState::Disposed {
            return Err(DisposeError::Disposed { type_name });
        }
        if !busy.exit() {
            return Err(DisposeError::Argument("exit_busy without a matching enter_busy"));
        }
        Ok(())
    }

    /// Enters a busy scope that exits when the returned token is released or dropped.
    ///
    /// # Errors
    ///
    /// Same as [`enter_busy`](Self::enter_busy).
    pub fn busy_token<'a>(
        type_name: &'static str,
        state: &'a AtomicDisposalState,
        busy: &'a BusyCounter,
    ) -> Result<BusyToken<'a>, DisposeError> {
        Self::enter_busy(type_name, state, busy)?;
        Ok(BusyToken {
            type_name,
            state,
            busy,
            released: false,
        })
    }
}

/// A scoped busy registration.
///
/// Dropping the token exits the scope, so the scope also ends if the work panics.
#[must_use = "the busy scope ends as soon as the token is dropped"]
#[derive(Debug)]
pub struct BusyToken<'a> {
    type_name: &'static str,
    state: &'a AtomicDisposalState,
    busy: &'a BusyCounter,
    released: bool,
}

impl BusyToken<'_> {
    /// Exits the busy scope now.
    ///
    /// # Errors
    ///
    /// Same as [`DisposeCoordinator::exit_busy`].
    pub fn release(mut self) -> Result<(), DisposeError> {
        self.released = true;
        DisposeCoordinator::exit_busy(self.type_name, self.state, self.busy)
    }
}

impl Drop for BusyToken<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            let _ = DisposeCoordinator::exit_busy(self.type_name, self.state, self.busy);
        }
    }
}
