//! # `disposal` - Guaranteed-Once Resource Teardown
//!
//! A lifecycle primitive for objects that hold resources needing explicit
//! release (handles, buffers, connections). Teardown runs exactly once under
//! arbitrary concurrent and reentrant invocation, never races an operation that
//! is still using the object, and composes with a reference count so shared
//! ownership defers release to the last holder.
//!
//! ## Guarantees
//!
//! ### Exactly-once teardown
//! - **Single winner**: one compare-and-swap decides which caller performs the
//!   `Undisposed → Disposing` transition. Every other caller waits for it to
//!   finish and returns `Ok(())`.
//! - **Failure is final**: a failing or panicking teardown still leaves the
//!   entity `Disposed`. A second `dispose` is a no-op, never a retry.
//!
//! ### Busy barrier
//! - Operations bracketed by `enter_busy`/`exit_busy` (or a [`BusyToken`]) that
//!   started before disposal was claimed finish before teardown begins.
//!   While `dispose` waits for them, the entity is still live.
//! - Operations that start after the claim fail fast with
//!   [`DisposeError::Disposed`].
//!
//! ### Lock-free hot path
//! - Disposal state and busy counts change only through atomic CAS, increment
//!   and decrement. All waiting is spin-waiting with backoff; there is no
//!   timeout, so busy scopes must be short.
//!
//! ## Architecture
//!
//! 1. **[`DisposeCoordinator`]**: stateless protocol functions over a caller's
//!    [`AtomicDisposalState`](concurrency::AtomicDisposalState) and
//!    [`BusyCounter`](concurrency::BusyCounter).
//! 2. **[`Lifecycle`]**: the composable base an owner embeds.
//!    [`Disposable<T>`] wraps a single [`Resource`].
//! 3. **[`RefCounted<T>`]**: starts with one reference; only the release that
//!    brings the count to zero tears down.
//! 4. **[`ReleaseToken`] / [`ReleaseHandle`]**: one-shot callables with
//!    reference identity and value identity respectively.
//! 5. **[`tracking`]**: optional registry reporting instances that were dropped
//!    without being disposed.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use disposal::{Dispose, RefCounted, Resource};
//!
//! struct Connection {
//!     closed: std::sync::atomic::AtomicBool,
//! }
//!
//! impl Resource for Connection {
//!     fn release_managed(&self) -> anyhow::Result<()> {
//!         self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
//!         Ok(())
//!     }
//! }
//!
//! let conn = Arc::new(RefCounted::untracked(Connection {
//!     closed: Default::default(),
//! }));
//!
//! // A borrower takes a reference.
//! let lease = conn.create_reference_token().unwrap();
//! conn.run(|c| assert!(!c.closed.load(std::sync::atomic::Ordering::SeqCst))).unwrap();
//!
//! // The creator lets go; the borrower still holds the connection open.
//! conn.dispose().unwrap();
//! assert!(!conn.is_disposed());
//!
//! // The last release tears it down.
//! lease.release().unwrap();
//! assert!(conn.is_disposed());
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod batch;
pub mod concurrency;
pub mod error;
pub mod lifecycle;
pub mod token;
pub mod tracking;

pub use batch::{dispose_all, dispose_opt, BatchOptions};
#[cfg(feature = "parallel")]
pub use batch::dispose_all_parallel;
pub use concurrency::DisposalState;
pub use error::{AggregateDisposeError, DisposeError};
pub use lifecycle::{BusyToken, Disposable, Dispose, DisposeCoordinator, Lifecycle, RefCounted, Resource};
pub use token::{ReleaseHandle, ReleaseToken};
pub use tracking::{InstanceTracker, TrackedInstance, Tracker, TrackingConfig};

// Compile-time assertions for memory layout
const _: () = {
    use core::mem;

    // The state flag is a single byte; the wrapper adds nothing.
    assert!(mem::size_of::<concurrency::AtomicDisposalState>() == 1);
    assert!(mem::size_of::<DisposalState>() == 1);

    // Taking a one-shot action is a single pointer swap.
    assert!(mem::size_of::<token::OnceAction>() == mem::size_of::<usize>());

    // A value-identity handle is an id plus one shared pointer.
    assert!(mem::size_of::<ReleaseHandle>() <= mem::size_of::<u64>() * 2);

    // The busy barrier stays within two words (gate byte + counter).
    assert!(mem::size_of::<concurrency::BusyCounter>() <= mem::size_of::<usize>() * 2);
};
