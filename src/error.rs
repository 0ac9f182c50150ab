//! Error types for the Pacer rate limiter.

use thiserror::Error;

/// Main error type for Pacer operations.
#[derive(Error, Debug)]
pub enum PacerError {
    /// Rejected limiter configuration (empty constraint set, zero period or count)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller's wait was aborted before a slot was recorded
    #[error("Cancelled while waiting for admission")]
    Cancelled,

    /// The limiter was torn down
    #[error("Limiter has been disposed")]
    Disposed,

    /// Timestamp store backend failures
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for PacerError {
    fn from(err: config::ConfigError) -> Self {
        PacerError::Config(err.to_string())
    }
}

/// Result type alias for Pacer operations.
pub type Result<T> = std::result::Result<T, PacerError>;

/// Failure of a single `perform` call.
///
/// Either the limiter refused to run the action, or the action ran and
/// returned its own error, which is carried through untouched.
#[derive(Error, Debug)]
pub enum PerformError<E> {
    /// The limiter failed before the action was invoked
    #[error(transparent)]
    Limiter(#[from] PacerError),

    /// The action itself failed; its slot stays consumed
    #[error("Action failed: {0}")]
    Action(E),
}

impl<E> PerformError<E> {
    /// Returns the action's own error, if that is what failed.
    pub fn into_action(self) -> Option<E> {
        match self {
            PerformError::Action(err) => Some(err),
            PerformError::Limiter(_) => None,
        }
    }

    /// Returns the limiter-side error, if the action never ran.
    pub fn limiter_error(&self) -> Option<&PacerError> {
        match self {
            PerformError::Limiter(err) => Some(err),
            PerformError::Action(_) => None,
        }
    }

    /// Whether the call was aborted by a cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PerformError::Limiter(PacerError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_is_preserved() {
        let err: PerformError<&str> = PerformError::Action("boom");
        assert!(err.limiter_error().is_none());
        assert_eq!(err.into_action(), Some("boom"));
    }

    #[test]
    fn test_limiter_error_display() {
        let err: PerformError<std::io::Error> = PacerError::Cancelled.into();
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Cancelled while waiting for admission");
    }
}
