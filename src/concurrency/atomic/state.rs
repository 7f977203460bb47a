use core::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of a disposable entity.
///
/// Transitions are monotonic: `Undisposed → Disposing → Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DisposalState {
    /// Initial state; the entity is usable.
    Undisposed = 0,
    /// Teardown has been claimed by one thread and is running.
    Disposing = 1,
    /// Terminal state.
    Disposed = 2,
}

impl DisposalState {
    #[inline(always)]
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Undisposed,
            1 => Self::Disposing,
            _ => Self::Disposed,
        }
    }

    /// Returns `true` once disposal has been claimed, whether or not it finished.
    #[inline(always)]
    pub const fn is_disposed_or_disposing(self) -> bool {
        !matches!(self, Self::Undisposed)
    }
}

/// An atomically updated [`DisposalState`].
#[repr(transparent)]
#[derive(Debug)]
pub struct AtomicDisposalState {
    inner: AtomicU8,
}

impl AtomicDisposalState {
    /// Creates a new cell in the `Undisposed` state.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            inner: AtomicU8::new(DisposalState::Undisposed as u8),
        }
    }

    /// Loads the current state.
    #[inline(always)]
    pub fn load(&self, order: Ordering) -> DisposalState {
        DisposalState::from_raw(self.inner.load(order))
    }

    /// Attempts the `Undisposed → Disposing` transition.
    ///
    /// Returns `true` for exactly one caller over the lifetime of the cell.
    /// Uses `AcqRel` on success and `Acquire` on failure.
    #[inline]
    pub fn try_claim(&self) -> bool {
        self.inner
            .compare_exchange(
                DisposalState::Undisposed as u8,
                DisposalState::Disposing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Marks the terminal state.
    ///
    /// Only the thread that won [`try_claim`](Self::try_claim) may call this.
    #[inline]
    pub(crate) fn mark_disposed(&self) {
        let prev = self.inner.swap(DisposalState::Disposed as u8, Ordering::AcqRel);
        debug_assert_eq!(prev, DisposalState::Disposing as u8);
    }
}

impl Default for AtomicDisposalState {
    fn default() -> Self {
        Self::new()
    }
}
