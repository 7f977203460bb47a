//! Bounded spin-waiting.
//!
//! Every wait in this crate is a busy-poll. The protected sections (teardown and
//! busy scopes) are expected to be short, so no OS blocking primitive is used.

use crossbeam_utils::Backoff;

/// Spins, with exponential backoff and eventual yielding, until `done` returns `true`.
///
/// There is no timeout: callers must keep the awaited work bounded.
#[inline]
pub fn spin_until(mut done: impl FnMut() -> bool) {
    let backoff = Backoff::new();
    while !done() {
        backoff.snooze();
    }
}
