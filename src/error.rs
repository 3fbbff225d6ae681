use crate::context::CancelReason;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::LockManager::lock`].
///
/// A context firing is the only way `lock` fails. `unlock` has no error path:
/// releasing something that is not held is a no-op.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("lock wait cancelled after {waited:?}")]
    Cancelled { waited: Duration },
    #[error("lock wait deadline exceeded after {waited:?}")]
    DeadlineExceeded { waited: Duration },
}

impl LockError {
    pub(crate) fn from_reason(reason: CancelReason, waited: Duration) -> Self {
        match reason {
            CancelReason::Cancelled => LockError::Cancelled { waited },
            CancelReason::DeadlineExceeded => LockError::DeadlineExceeded { waited },
        }
    }

    /// True when the caller's context fired before the lock could be granted.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            LockError::Cancelled { .. } | LockError::DeadlineExceeded { .. }
        )
    }
}

pub type Result<T, E = LockError> = std::result::Result<T, E>;
