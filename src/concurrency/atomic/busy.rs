use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::concurrency::spin::spin_until;

const GATE_OPEN: u8 = 0;
const GATE_CLOSING: u8 = 1;
const GATE_LOCKED: u8 = 2;

/// Observable phase of a [`BusyCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyPhase {
    /// Open with no operation in flight.
    Idle,
    /// Open with at least one operation in flight.
    Busy,
    /// A closer found the counter idle and is about to lock; entrants wait.
    Closing,
    /// Closed for good; every further enter fails.
    Locked,
}

/// Count of in-flight operations, plus a gate that disposal closes.
///
/// The gate and the counter are separate words. The gate only moves
/// `open → closing` while the counter reads zero, and `closing` either falls
/// back to `open` or is sealed to `locked`. An enter increments first and then
/// re-reads the gate; a closer marks the gate `closing` first and then re-reads
/// the counter. With sequentially consistent ordering on both sides, either the
/// enter sees the closing gate and backs out, or the closer sees the increment
/// and reopens.
#[derive(Debug)]
pub struct BusyCounter {
    gate: AtomicU8,
    active: AtomicUsize,
}

impl BusyCounter {
    /// Creates an open, idle counter.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            gate: AtomicU8::new(GATE_OPEN),
            active: AtomicUsize::new(0),
        }
    }

    /// Registers one in-flight operation.
    ///
    /// Waits out a concurrent [`try_close`](Self::try_close). Returns `false`
    /// (leaving the count unchanged) once the gate is locked.
    #[inline]
    pub fn try_enter(&self) -> bool {
        let backoff = Backoff::new();
        loop {
            match self.gate.load(Ordering::SeqCst) {
                GATE_LOCKED => return false,
                GATE_CLOSING => {
                    backoff.snooze();
                    continue;
                }
                _ => {}
            }
            self.active.fetch_add(1, Ordering::SeqCst);
            match self.gate.load(Ordering::SeqCst) {
                GATE_OPEN => return true,
                gate => {
                    // Lost the race against a closer, which may be counting on us.
                    self.exit();
                    if gate == GATE_LOCKED {
                        return false;
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Unregisters one in-flight operation.
    ///
    /// Returns `false` if there was nothing to exit.
    #[inline]
    pub fn exit(&self) -> bool {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Moves the gate from open to closing, provided nothing is in flight.
    ///
    /// Returns `true` if this caller now holds the closing gate; it must follow
    /// up with [`seal`](Self::seal) or [`reopen`](Self::reopen). Returns `false`
    /// if the gate was not open or an operation is in flight.
    pub fn try_close(&self) -> bool {
        if self
            .gate
            .compare_exchange(GATE_OPEN, GATE_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        if self.active.load(Ordering::SeqCst) != 0 {
            self.reopen();
            return false;
        }
        true
    }

    /// Returns a closing gate to open.
    pub fn reopen(&self) {
        let _ = self
            .gate
            .compare_exchange(GATE_CLOSING, GATE_OPEN, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Locks a closing gate. Irreversible.
    pub fn seal(&self) {
        let prev = self.gate.swap(GATE_LOCKED, Ordering::SeqCst);
        debug_assert_ne!(prev, GATE_OPEN, "sealed a gate nobody closed");
    }

    /// Returns `true` once the gate has been sealed.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.gate.load(Ordering::Acquire) == GATE_LOCKED
    }

    /// Number of operations currently in flight.
    #[inline(always)]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Current phase.
    pub fn phase(&self) -> BusyPhase {
        match self.gate.load(Ordering::Acquire) {
            GATE_LOCKED => BusyPhase::Locked,
            GATE_CLOSING => BusyPhase::Closing,
            _ if self.active() == 0 => BusyPhase::Idle,
            _ => BusyPhase::Busy,
        }
    }

    /// Spins until no operation is in flight.
    pub fn wait_idle(&self) {
        spin_until(|| self.active.load(Ordering::SeqCst) == 0);
    }
}

impl Default for BusyCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn close(busy: &BusyCounter) {
        loop {
            busy.wait_idle();
            if busy.try_close() {
                busy.seal();
                return;
            }
            thread::yield_now();
        }
    }

    #[test]
    fn enter_exit_balance() {
        let busy = BusyCounter::new();
        assert_eq!(busy.phase(), BusyPhase::Idle);
        assert!(busy.try_enter());
        assert!(busy.try_enter());
        assert_eq!(busy.phase(), BusyPhase::Busy);
        assert_eq!(busy.active(), 2);
        assert!(busy.exit());
        assert!(busy.exit());
        assert!(!busy.exit());
        assert_eq!(busy.active(), 0);
    }

    #[test]
    fn close_refuses_while_busy() {
        let busy = BusyCounter::new();
        assert!(busy.try_enter());
        assert!(!busy.try_close());
        assert_eq!(busy.phase(), BusyPhase::Busy);

        // The scope already open can still nest.
        assert!(busy.try_enter());
        assert!(busy.exit());
        assert!(busy.exit());

        assert!(busy.try_close());
        assert_eq!(busy.phase(), BusyPhase::Closing);
        assert!(!busy.try_close());
        busy.reopen();
        assert_eq!(busy.phase(), BusyPhase::Idle);
        assert!(busy.try_enter());
        assert!(busy.exit());
    }

    #[test]
    fn sealed_gate_rejects_enter() {
        let busy = BusyCounter::new();
        assert!(busy.try_close());
        busy.seal();
        assert!(busy.is_locked());
        assert!(!busy.try_enter());
        assert!(!busy.try_close());
        assert_eq!(busy.active(), 0);
        assert_eq!(busy.phase(), BusyPhase::Locked);
    }

    #[test]
    fn entrant_waits_out_a_closing_gate() {
        let busy = BusyCounter::new();
        assert!(busy.try_close());
        thread::scope(|s| {
            let h = s.spawn(|| busy.try_enter());
            thread::sleep(Duration::from_millis(20));
            assert_eq!(busy.active(), 0);
            busy.reopen();
            assert!(h.join().unwrap());
        });
        assert_eq!(busy.active(), 1);
    }

    #[test]
    fn close_never_misses_an_entrant() {
        for _ in 0..200 {
            let busy = BusyCounter::new();
            let finished = AtomicBool::new(false);
            let barrier = Barrier::new(2);
            thread::scope(|s| {
                let h = s.spawn(|| {
                    barrier.wait();
                    if busy.try_enter() {
                        thread::yield_now();
                        finished.store(true, Ordering::SeqCst);
                        assert!(busy.exit());
                        true
                    } else {
                        false
                    }
                });
                barrier.wait();
                close(&busy);
                let finished_at_close = finished.load(Ordering::SeqCst);
                let entered = h.join().unwrap();
                // An entrant that got in must have left before the gate closed.
                assert_eq!(entered, finished_at_close);
            });
            assert_eq!(busy.active(), 0);
        }
    }
}
