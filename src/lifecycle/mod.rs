//! The disposal protocol: coordinator, entity contract and reference counting.

pub mod coordinator;
pub mod entity;
pub mod ref_counted;

pub use coordinator::{BusyToken, DisposeCoordinator};
pub use entity::{Disposable, Dispose, Lifecycle, Resource};
pub use ref_counted::RefCounted;

#[cfg(test)]
mod tests;
