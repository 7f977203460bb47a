//! Lock-free building blocks for the disposal protocol.
//!
//! Everything here is mutated only through atomic compare-and-swap, increment
//! and decrement; no general-purpose lock is taken on the hot path.

pub mod atomic;
pub mod spin;

pub use atomic::{AtomicDisposalState, BusyCounter, BusyPhase, DisposalState};
pub use spin::spin_until;
