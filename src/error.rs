//! Error taxonomy for the disposal protocol.

use core::fmt;
use std::collections::TryReserveError;

/// The error type returned by lifecycle operations.
#[derive(Debug)]
pub enum DisposeError {
    /// A required argument was absent or a call was made out of protocol.
    Argument(&'static str),
    /// The entity is disposed, or its disposal is in progress.
    Disposed {
        /// Concrete type of the entity.
        type_name: &'static str,
    },
    /// The owner's teardown routine failed.
    ///
    /// The entity is still marked disposed; a later `dispose` is a no-op, not a retry.
    Teardown {
        /// Concrete type of the entity.
        type_name: &'static str,
        /// The error raised by the owner.
        source: anyhow::Error,
    },
}

impl DisposeError {
    /// Creates a disposed-object violation for `T`.
    #[inline]
    pub fn disposed<T: ?Sized>() -> Self {
        Self::Disposed {
            type_name: core::any::type_name::<T>(),
        }
    }

    /// Returns `true` for disposed-object violations.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    /// Returns `true` when the failure means memory or another hard resource ran out.
    ///
    /// Fatal errors are never suppressed by batch release.
    pub fn is_fatal(&self) -> bool {
        let Self::Teardown { source, .. } = self else {
            return false;
        };
        source.chain().any(|cause| {
            cause.is::<TryReserveError>()
                || cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|e| e.kind() == std::io::ErrorKind::OutOfMemory)
        })
    }
}

impl fmt::Display for DisposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument(what) => write!(f, "invalid argument: {what}"),
            Self::Disposed { type_name } => write!(f, "cannot access a disposed object: {type_name}"),
            Self::Teardown { type_name, source } => {
                write!(f, "teardown of {type_name} failed: {source}")
            }
        }
    }
}

impl std::error::Error for DisposeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Teardown { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

/// Failures collected while releasing a batch of unrelated disposables.
#[derive(Debug)]
pub struct AggregateDisposeError {
    errors: Vec<DisposeError>,
}

impl AggregateDisposeError {
    pub(crate) fn new(errors: Vec<DisposeError>) -> Self {
        Self { errors }
    }

    /// The individual failures, in the order they were observed.
    pub fn errors(&self) -> &[DisposeError] {
        &self.errors
    }

    /// Consumes the aggregate, returning the individual failures.
    pub fn into_errors(self) -> Vec<DisposeError> {
        self.errors
    }

    /// Number of failures.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` if no failures were collected.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateDisposeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} disposal(s) failed", self.errors.len())?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateDisposeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
