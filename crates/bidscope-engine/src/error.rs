//! Engine error types.

use thiserror::Error;

use bidscope_traits::TraitError;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
///
/// `Clone` so that callers sharing one in-flight computation all receive
/// the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Bad enum or range input from the caller
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown company or project type
    #[error("not found: {0}")]
    NotFound(String),

    /// Ledger or other backend unreachable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The caller's deadline passed before the computation finished
    #[error("deadline exceeded after {0} ms")]
    DeadlineExceeded(u64),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Engine is shutting down
    #[error("engine is shutting down")]
    Shutdown,

    /// Aggregation invariant violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Short machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidArgument(_) => "invalid_argument",
            EngineError::NotFound(_) => "not_found",
            EngineError::Unavailable(_) => "unavailable",
            EngineError::DeadlineExceeded(_) => "deadline_exceeded",
            EngineError::ConfigError(_) => "config",
            EngineError::Shutdown => "shutdown",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Whether an adapter may retry the request with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Unavailable(_) | EngineError::DeadlineExceeded(_)
        )
    }
}

impl From<TraitError> for EngineError {
    fn from(e: TraitError) -> Self {
        if e.is_unavailable() {
            return EngineError::Unavailable(e.to_string());
        }
        match e {
            TraitError::NotFound(what) => EngineError::NotFound(what),
            TraitError::InvalidInput(msg) => EngineError::InvalidArgument(msg),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trait_error_mapping() {
        assert!(matches!(
            EngineError::from(TraitError::ConnectionFailed("db".into())),
            EngineError::Unavailable(_)
        ));
        assert!(matches!(
            EngineError::from(TraitError::Timeout),
            EngineError::Unavailable(_)
        ));
        assert_eq!(
            EngineError::from(TraitError::NotFound("C9".into())),
            EngineError::NotFound("C9".into())
        );
        assert!(matches!(
            EngineError::from(TraitError::ParseError("x".into())),
            EngineError::Internal(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(EngineError::Unavailable("x".into()).is_retryable());
        assert!(!EngineError::InvalidArgument("x".into()).is_retryable());
        assert!(!EngineError::Internal("x".into()).is_retryable());
    }
}
