//! Releasing collections of unrelated disposables.
//!
//! One item's failure never stops the pass. Failures are collected and returned
//! together once every item has been visited.

use crate::error::{AggregateDisposeError, DisposeError};
use crate::lifecycle::Dispose;

/// How a batch pass treats failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    /// Discard failures instead of reporting them. Fatal failures
    /// ([`DisposeError::is_fatal`]) are reported regardless.
    pub suppress_errors: bool,
}

impl BatchOptions {
    /// Report every failure.
    pub const REPORT: Self = Self {
        suppress_errors: false,
    };

    /// Report only fatal failures.
    pub const SUPPRESS: Self = Self {
        suppress_errors: true,
    };

    fn keeps(self, error: &DisposeError) -> bool {
        !self.suppress_errors || error.is_fatal()
    }
}

fn finish(errors: Vec<DisposeError>) -> Result<(), AggregateDisposeError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AggregateDisposeError::new(errors))
    }
}

/// Disposes every item in order.
///
/// # Errors
///
/// Returns the collected failures, filtered by `options`.
pub fn dispose_all<'a, I, D>(items: I, options: BatchOptions) -> Result<(), AggregateDisposeError>
where
    I: IntoIterator<Item = &'a D>,
    D: Dispose + ?Sized + 'a,
{
    let errors = items
        .into_iter()
        .filter_map(|item| item.dispose().err())
        .filter(|error| options.keeps(error))
        .collect();
    finish(errors)
}

/// Disposes every item on the rayon pool. Failures are reported in item order.
///
/// # Errors
///
/// Returns the collected failures, filtered by `options`.
#[cfg(feature = "parallel")]
pub fn dispose_all_parallel<D>(items: &[D], options: BatchOptions) -> Result<(), AggregateDisposeError>
where
    D: Dispose + Sync,
{
    use rayon::prelude::*;

    let errors = items
        .par_iter()
        .filter_map(|item| item.dispose().err())
        .filter(|error| options.keeps(error))
        .collect();
    finish(errors)
}

/// Disposes `item` if present.
///
/// # Errors
///
/// Propagates the item's failure.
#[inline]
pub fn dispose_opt<D: Dispose + ?Sized>(item: Option<&D>) -> Result<(), DisposeError> {
    item.map_or(Ok(()), |d| d.dispose())
}
