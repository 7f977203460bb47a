//! Atomic state cells owned by each disposable entity.

/// The tri-state disposal flag.
pub mod state;
/// The busy-operation barrier.
pub mod busy;

pub use busy::{BusyCounter, BusyPhase};
pub use state::{AtomicDisposalState, DisposalState};
