use std::backtrace::Backtrace;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::{InstanceTracker, TrackingConfig, TrackingId};
use crate::error::DisposeError;

/// Snapshot of one tracked instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedInstance {
    /// Tracker-assigned id.
    pub id: TrackingId,
    /// Concrete type of the entity.
    pub type_name: &'static str,
    /// Registration time, milliseconds since the Unix epoch.
    pub registered_at_ms: u64,
    /// Creation backtrace, if capture was on at registration.
    pub backtrace: Option<String>,
    /// Free-form state attached by the owner.
    pub state: Option<String>,
    /// `false` if the owner was dropped without being disposed.
    pub is_alive: bool,
}

struct Record {
    type_name: &'static str,
    registered_at_ms: u64,
    backtrace: Option<String>,
    state: Option<String>,
    liveness: Weak<()>,
}

struct Registry {
    allowed: BTreeSet<String>,
    records: BTreeMap<TrackingId, Record>,
}

/// A lock-guarded registry of live instances.
///
/// The enable flag and the backtrace flag are atomics so the disabled path
/// never takes the lock; the maps themselves sit behind one `Mutex`.
pub struct Tracker {
    enabled: AtomicBool,
    capture_backtraces: AtomicBool,
    next_id: AtomicU64,
    registry: Mutex<Registry>,
}

impl Tracker {
    /// Creates a disabled tracker with an empty allow-list.
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            capture_backtraces: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            registry: Mutex::new(Registry {
                allowed: BTreeSet::new(),
                records: BTreeMap::new(),
            }),
        }
    }

    // Records are diagnostic only; a panic elsewhere must not disable them.
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether instances are being recorded.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turns recording on or off. Turning it off forgets every record and
    /// clears the allow-list.
    pub fn set_enabled(&self, enabled: bool) {
        let mut registry = self.lock();
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            registry.records.clear();
            registry.allowed.clear();
        }
    }

    /// Whether creation backtraces are captured.
    #[inline]
    pub fn captures_backtraces(&self) -> bool {
        self.capture_backtraces.load(Ordering::Acquire)
    }

    /// Turns creation-backtrace capture on or off. Affects later registrations only.
    pub fn set_capture_backtraces(&self, capture: bool) {
        self.capture_backtraces.store(capture, Ordering::Release);
    }

    /// Restricts tracking to the listed types. An empty list tracks every type.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Argument`] if `type_name` is empty.
    pub fn allow_type(&self, type_name: &str) -> Result<(), DisposeError> {
        if type_name.is_empty() {
            return Err(DisposeError::Argument("type_name"));
        }
        self.lock().allowed.insert(type_name.to_owned());
        Ok(())
    }

    /// Removes a type from the allow-list. Returns whether it was listed.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Argument`] if `type_name` is empty.
    pub fn disallow_type(&self, type_name: &str) -> Result<bool, DisposeError> {
        if type_name.is_empty() {
            return Err(DisposeError::Argument("type_name"));
        }
        Ok(self.lock().allowed.remove(type_name))
    }

    /// The current allow-list.
    pub fn allowed_types(&self) -> Vec<String> {
        self.lock().allowed.iter().cloned().collect()
    }

    /// Installs `config`, replacing the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Argument`] if the allow-list holds an empty name;
    /// nothing is changed in that case.
    pub fn apply(&self, config: &TrackingConfig) -> Result<(), DisposeError> {
        if config.allowed_types.iter().any(String::is_empty) {
            return Err(DisposeError::Argument("type_name"));
        }
        self.set_enabled(config.enabled);
        self.set_capture_backtraces(config.capture_backtraces);
        if config.enabled {
            let mut registry = self.lock();
            registry.allowed = config.allowed_types.iter().cloned().collect();
        }
        Ok(())
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> TrackingConfig {
        TrackingConfig {
            enabled: self.is_enabled(),
            capture_backtraces: self.captures_backtraces(),
            allowed_types: self.allowed_types(),
        }
    }

    /// Number of records, dead ones included.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// `true` when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Attaches a free-form state string to a record.
    pub fn set_state(&self, id: TrackingId, state: impl Into<String>) {
        if let Some(record) = self.lock().records.get_mut(&id) {
            record.state = Some(state.into());
        }
    }

    /// Snapshots every record, oldest first.
    ///
    /// Records whose owner is gone are reported once with `is_alive == false`
    /// and removed.
    pub fn enumerate(&self) -> Vec<TrackedInstance> {
        let mut registry = self.lock();
        let mut out = Vec::with_capacity(registry.records.len());
        registry.records.retain(|&id, record| {
            let is_alive = record.liveness.strong_count() > 0;
            if !is_alive {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    id = id.get(),
                    type_name = record.type_name,
                    "instance dropped without being disposed"
                );
            }
            out.push(TrackedInstance {
                id,
                type_name: record.type_name,
                registered_at_ms: record.registered_at_ms,
                backtrace: record.backtrace.clone(),
                state: record.state.clone(),
                is_alive,
            });
            is_alive
        });
        out
    }

    /// [`enumerate`](Self::enumerate), rendered as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures from `serde_json`.
    pub fn report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.enumerate())
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceTracker for Tracker {
    #[inline]
    fn is_tracking(&self, type_name: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let registry = self.lock();
        registry.allowed.is_empty() || registry.allowed.contains(type_name)
    }

    fn on_register(&self, liveness: Weak<()>, type_name: &'static str) -> Option<TrackingId> {
        if !self.is_enabled() {
            return None;
        }
        let backtrace = self
            .captures_backtraces()
            .then(|| Backtrace::force_capture().to_string());
        let registered_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        let id = TrackingId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut registry = self.lock();
        // Re-check under the lock: a concurrent disable must not be undone.
        if !self.is_enabled() {
            return None;
        }
        registry.records.insert(
            id,
            Record {
                type_name,
                registered_at_ms,
                backtrace,
                state: None,
                liveness,
            },
        );
        #[cfg(feature = "tracing")]
        tracing::debug!(id = id.get(), type_name, "instance registered");
        Some(id)
    }

    fn on_unregister(&self, id: TrackingId, _type_name: &'static str) {
        let _removed = self.lock().records.remove(&id).is_some();
        #[cfg(feature = "tracing")]
        tracing::debug!(id = id.get(), type_name = _type_name, removed = _removed, "instance unregistered");
    }

    fn on_state(&self, id: TrackingId, state: String) {
        self.set_state(id, state);
    }
}
