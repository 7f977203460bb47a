//! Release tokens: one-shot callables.
//!
//! Two flavors share the [`OnceAction`] slot:
//!
//! - [`ReleaseToken`]: reference identity, not `Clone`, releases itself on drop
//!   if nobody did. Returned to reference-count borrowers.
//! - [`ReleaseHandle`]: value identity via a unique id, `Clone`, never releases
//!   on drop. Clones share the action, so the first release wins.

/// The shared one-shot slot.
pub mod once;
/// Reference-identity tokens.
pub mod release;
/// Value-identity handles.
pub mod handle;

pub use handle::ReleaseHandle;
pub use once::{OnceAction, ReleaseAction};
pub use release::ReleaseToken;
