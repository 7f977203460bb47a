//! Diagnostic registry of live disposable instances.
//!
//! Entities report construction and successful teardown through the
//! [`InstanceTracker`] hooks. A [`Tracker`] keeps one record per live entity;
//! an entity that is dropped without being disposed shows up once as
//! "not alive" in the next [`Tracker::enumerate`] and is then pruned.
//!
//! Tracking is off by default. When off, entity construction pays for a single
//! atomic load.
//!
//! ```rust
//! use disposal::tracking::Tracker;
//! use disposal::{Disposable, Dispose, Resource};
//!
//! struct Socket;
//! impl Resource for Socket {}
//!
//! static TRACKER: Tracker = Tracker::new();
//! TRACKER.set_enabled(true);
//!
//! let leaked = Disposable::with_tracker(Socket, &TRACKER);
//! drop(leaked);
//! let report = TRACKER.enumerate();
//! assert_eq!(report.len(), 1);
//! assert!(!report[0].is_alive);
//! assert!(TRACKER.enumerate().is_empty());
//! ```

mod config;
mod registry;

pub use config::TrackingConfig;
pub use registry::{TrackedInstance, Tracker};

use serde::Serialize;
use std::sync::{OnceLock, Weak};

/// Environment variable holding a JSON [`TrackingConfig`] for the global tracker.
pub const CONFIG_ENV: &str = "DISPOSAL_TRACKING";

/// Identifier assigned to a tracked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TrackingId(pub(crate) u64);

impl TrackingId {
    /// The raw id.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Hooks invoked by entities at construction and successful teardown.
pub trait InstanceTracker: Send + Sync {
    /// Cheap pre-check consulted before any other hook.
    fn is_tracking(&self, type_name: &str) -> bool;

    /// Records a new instance. `liveness` dies with the instance.
    fn on_register(&self, liveness: Weak<()>, type_name: &'static str) -> Option<TrackingId>;

    /// Forgets an instance whose teardown succeeded.
    fn on_unregister(&self, id: TrackingId, type_name: &'static str);

    /// Attaches a free-form diagnostic string to a record.
    fn on_state(&self, _id: TrackingId, _state: String) {}
}

/// A tracker that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

impl InstanceTracker for NoopTracker {
    #[inline(always)]
    fn is_tracking(&self, _type_name: &str) -> bool {
        false
    }

    fn on_register(&self, _liveness: Weak<()>, _type_name: &'static str) -> Option<TrackingId> {
        None
    }

    fn on_unregister(&self, _id: TrackingId, _type_name: &'static str) {}
}

/// The process-wide tracker used by [`Lifecycle::new`](crate::Lifecycle::new).
///
/// On first access it applies the JSON configuration in [`CONFIG_ENV`], if set
/// and valid; otherwise it starts disabled.
pub fn global() -> &'static Tracker {
    static GLOBAL: OnceLock<Tracker> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        let tracker = Tracker::new();
        if let Ok(raw) = std::env::var(CONFIG_ENV) {
            match TrackingConfig::from_json(&raw) {
                Ok(config) => {
                    if let Err(_error) = tracker.apply(&config) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %_error, "ignoring invalid tracking allow-list");
                    }
                }
                Err(_error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_error, env = CONFIG_ENV, "ignoring malformed tracking config");
                }
            }
        }
        tracker
    })
}
