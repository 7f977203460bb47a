//! `OnceAction`: an atomically consumed, boxed callback.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::error::DisposeError;

/// The callable stored in release tokens.
pub type ReleaseAction = Box<dyn FnOnce() -> Result<(), DisposeError> + Send>;

/// A slot holding a callback that can be taken exactly once.
///
/// The slot is a thin pointer to a heap cell holding the (fat) boxed closure,
/// so taking it is a single atomic swap to null.
pub struct OnceAction {
    slot: AtomicPtr<ReleaseAction>,
}

impl OnceAction {
    /// Stores `action`.
    pub fn new(action: ReleaseAction) -> Self {
        Self {
            slot: AtomicPtr::new(Box::into_raw(Box::new(action))),
        }
    }

    /// Takes the callback, leaving the slot empty. Returns `None` for every
    /// caller after the first.
    #[inline]
    pub fn take(&self) -> Option<ReleaseAction> {
        let raw = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
        if raw.is_null() {
            None
        } else {
            // SAFETY: `raw` came from `Box::into_raw` in `new`, and the swap
            // guarantees no other caller received the same pointer.
            Some(*unsafe { Box::from_raw(raw) })
        }
    }

    /// Takes and runs the callback; `Ok(())` if it was already taken.
    ///
    /// # Errors
    ///
    /// Propagates the callback's error.
    #[inline]
    pub fn run(&self) -> Result<(), DisposeError> {
        match self.take() {
            Some(action) => action(),
            None => Ok(()),
        }
    }

    /// Returns `true` once the callback has been taken.
    #[inline]
    pub fn is_consumed(&self) -> bool {
        self.slot.load(Ordering::Acquire).is_null()
    }
}

impl Drop for OnceAction {
    fn drop(&mut self) {
        // Drops an unused callback without running it.
        drop(self.take());
    }
}

impl core::fmt::Debug for OnceAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OnceAction")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn runs_once_under_contention() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let action = OnceAction::new(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let barrier = Barrier::new(16);
        thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    barrier.wait();
                    action.run().unwrap();
                });
            }
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(action.is_consumed());
    }

    #[test]
    fn drop_discards_without_running() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let action = OnceAction::new(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        drop(action);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        // The closure (and its clone of `hits`) was freed.
        assert_eq!(Arc::strong_count(&hits), 1);
    }
}
