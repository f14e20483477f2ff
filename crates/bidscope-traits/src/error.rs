//! Error types for collaborator operations.

use thiserror::Error;

/// Common error type for ledger and other collaborator operations.
#[derive(Debug, Error)]
pub enum TraitError {
    /// Connection to the backing store failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Requested resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Operation timed out
    #[error("timeout")]
    Timeout,

    /// Parse/deserialization error
    #[error("parse error: {0}")]
    ParseError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lifecycle transition not allowed
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl TraitError {
    /// Returns true if the failure is about reaching the backend rather than the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TraitError::ConnectionFailed(_)
                | TraitError::Timeout
                | TraitError::IoError(_)
        )
    }
}

impl From<std::io::Error> for TraitError {
    fn from(e: std::io::Error) -> Self {
        TraitError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for TraitError {
    fn from(e: serde_json::Error) -> Self {
        TraitError::ParseError(e.to_string())
    }
}
