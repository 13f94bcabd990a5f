//! Explicit outcome type for cleanup paths whose failures are never propagated.

use crate::error::Error;

/// Outcome of an operation that must not fail its caller.
///
/// Stopping a voice, releasing a wake lock, or requesting one on a platform
/// without support all end up here: the failure is kept as a value so callers
/// and tests can inspect it, but nothing is returned as an `Err`.
#[must_use]
#[derive(Debug)]
pub enum BestEffort {
    /// The operation completed (or there was nothing to do).
    Completed,
    /// The operation failed and the failure was deliberately ignored.
    Ignored(Error),
}

impl BestEffort {
    /// Wraps a result, turning an error into [`BestEffort::Ignored`].
    pub fn from_result<T>(result: crate::Result<T>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(e) => Self::Ignored(e),
        }
    }

    /// Returns true if a failure was swallowed.
    #[must_use]
    pub const fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }

    /// Returns the swallowed failure, if any.
    #[must_use]
    pub const fn ignored(&self) -> Option<&Error> {
        match self {
            Self::Completed => None,
            Self::Ignored(e) => Some(e),
        }
    }

    /// Keeps the first ignored failure of `self` and `other`.
    pub fn and(self, other: Self) -> Self {
        match self {
            Self::Completed => other,
            ignored @ Self::Ignored(_) => ignored,
        }
    }

    /// Logs an ignored failure at debug level and discards the outcome.
    pub fn log(self, what: &str) {
        if let Self::Ignored(e) = self {
            log::debug!("Ignored failure during {what}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_ok_is_completed() {
        assert!(!BestEffort::from_result(Ok::<_, Error>(5)).is_ignored());
    }

    #[test]
    fn from_err_keeps_error() {
        let outcome = BestEffort::from_result::<()>(Err(Error::WakeLock("denied".to_string())));
        assert!(outcome.is_ignored());
        assert!(matches!(outcome.ignored(), Some(Error::WakeLock(m)) if m == "denied"));
    }

    #[test]
    fn and_keeps_first_failure() {
        let first = BestEffort::Ignored(Error::AudioDevice("stop".to_string()));
        let second = BestEffort::Ignored(Error::AudioDevice("disconnect".to_string()));
        let combined = first.and(second);
        assert!(matches!(combined.ignored(), Some(Error::AudioDevice(m)) if m == "stop"));

        let combined = BestEffort::Completed.and(BestEffort::Ignored(Error::Decode("x".into())));
        assert!(combined.is_ignored());
    }
}
