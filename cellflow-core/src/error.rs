//! Error types shared by the reactive engine and the flow runtime.
//!
//! Errors are `Clone` because a single failure is stored inside an atom and
//! handed to every task awaiting it.

use std::sync::Arc;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by atoms, awaiters and tasks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The operation was aborted through its context.
    ///
    /// Atoms treat this as a no-op: loading is reset and the previous state
    /// is kept.
    #[error("operation was aborted")]
    Aborted,

    /// The task producing this value was cancelled.
    #[error("task was cancelled")]
    Cancelled,

    /// The caller used the API incorrectly.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// A computation failed with a message.
    #[error("{0}")]
    Message(Arc<str>),

    /// A computation failed with an underlying error.
    #[error("{0}")]
    Source(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Create an error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(Arc::from(message.into()))
    }

    /// Wrap an arbitrary error.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Source(Arc::new(error))
    }

    /// Whether this error is abort-shaped.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Whether this error reports a cancelled task.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error reports API misuse.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}

/// Programmer misuse of the API.
///
/// These indicate a defect in the calling code and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// A computed atom or reducer returned a future instead of an awaiter.
    #[error("computed and emittable atoms must not return a future; wrap asynchronous work with `wait()`")]
    FutureReturned,

    /// `wait()` was called while no atom was being evaluated.
    #[error("`wait()` can only be called while an atom is being evaluated")]
    WaitOutsideEvaluation,

    /// A signal backed by an external emitter was emitted manually.
    #[error("this signal is driven by an external emitter and cannot be emitted manually")]
    CustomSignalEmit,

    /// A direct assignment targeted a computed or emittable atom.
    #[error("only updatable atoms can be assigned or reset directly")]
    NotUpdatable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_convert() {
        let error: Error = UsageError::WaitOutsideEvaluation.into();
        assert!(error.is_usage());
        assert_eq!(
            error.to_string(),
            "`wait()` can only be called while an atom is being evaluated"
        );
    }

    #[test]
    fn wrapped_errors_display_their_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let error = Error::new(io);
        assert_eq!(error.to_string(), "disk full");
        assert!(!error.is_aborted());
    }

    #[test]
    fn message_errors_are_cheap_to_clone() {
        let error = Error::msg("boom");
        let copy = error.clone();
        assert_eq!(copy.to_string(), "boom");
        assert!(Error::Aborted.is_aborted());
        assert!(Error::Cancelled.is_cancelled());
    }
}
