//! `ReleaseToken`: a one-shot release obligation with reference identity.

use super::once::{OnceAction, ReleaseAction};
use crate::error::DisposeError;
use crate::lifecycle::Dispose;

/// Runs its action exactly once: on the first [`release`](Self::release), or
/// when dropped if nobody released it.
///
/// The token is not `Clone`; share it behind an `Arc` and the drop backstop
/// fires when the last reference goes away. Two tokens are equal only if they
/// are the same object.
#[must_use = "dropping the token releases it immediately"]
pub struct ReleaseToken {
    action: OnceAction,
}

impl ReleaseToken {
    /// Creates a token around an infallible action.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::fallible(move || {
            action();
            Ok(())
        })
    }

    /// Creates a token around an action that may fail.
    pub fn fallible<F>(action: F) -> Self
    where
        F: FnOnce() -> Result<(), DisposeError> + Send + 'static,
    {
        Self {
            action: OnceAction::new(Box::new(action)),
        }
    }

    /// Creates a token from an optional boxed action.
    ///
    /// # Errors
    ///
    /// Returns [`DisposeError::Argument`] if `action` is `None`.
    pub fn from_option(action: Option<ReleaseAction>) -> Result<Self, DisposeError> {
        let action = action.ok_or(DisposeError::Argument("action"))?;
        Ok(Self {
            action: OnceAction::new(action),
        })
    }

    /// Runs the action if this is the first release.
    ///
    /// # Errors
    ///
    /// Propagates the action's error to the first caller only.
    #[inline]
    pub fn release(&self) -> Result<(), DisposeError> {
        self.action.run()
    }

    /// Returns `true` once the action has been taken.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.action.is_consumed()
    }
}

impl Dispose for ReleaseToken {
    fn dispose(&self) -> Result<(), DisposeError> {
        self.release()
    }

    fn is_disposed(&self) -> bool {
        self.is_released()
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            #[cfg(feature = "tracing")]
            tracing::warn!("release token dropped without an explicit release");
            if let Err(_error) = action() {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %_error, "release token backstop failed");
            }
        }
    }
}

impl PartialEq for ReleaseToken {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self, other)
    }
}

impl Eq for ReleaseToken {}

impl core::fmt::Debug for ReleaseToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReleaseToken")
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting() -> (Arc<AtomicUsize>, ReleaseToken) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let token = ReleaseToken::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, token)
    }

    #[test]
    fn repeated_release_runs_once() {
        let (hits, token) = counting();
        assert!(!token.is_released());
        for _ in 0..5 {
            token.release().unwrap();
        }
        assert!(token.is_released());
        drop(token);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_is_the_backstop() {
        let (hits, token) = counting();
        drop(token);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_token_fires_on_last_drop() {
        let (hits, token) = counting();
        let a = Arc::new(token);
        let b = a.clone();
        drop(a);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_action_is_an_argument_error() {
        let err = ReleaseToken::from_option(None).unwrap_err();
        assert!(matches!(err, DisposeError::Argument("action")));
    }

    #[test]
    fn error_reaches_first_caller_only() {
        let token = ReleaseToken::fallible(|| Err(DisposeError::Argument("nope")));
        assert!(token.release().is_err());
        assert!(token.release().is_ok());
    }

    #[test]
    fn identity_equality() {
        let (_h1, a) = counting();
        let (_h2, b) = counting();
        assert_eq!(a, a);
        assert_ne!(a, b);
    }
}
