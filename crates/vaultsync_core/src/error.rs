//! Error types for the core data model.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the data model and settings persistence.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Settings could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Settings file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Attempt to move the checkpoint to an earlier timestamp.
    #[error("checkpoint regression: current={current}, attempted={attempted}")]
    CheckpointRegression {
        /// Timestamp currently stored.
        current: u64,
        /// Timestamp that was rejected.
        attempted: u64,
    },

    /// A path that cannot be represented in the vault namespace.
    #[error("invalid vault path: {0:?}")]
    InvalidPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::CheckpointRegression {
            current: 20,
            attempted: 10,
        };
        let msg = err.to_string();
        assert!(msg.contains("20"));
        assert!(msg.contains("10"));

        let err = CoreError::InvalidPath("../x".into());
        assert!(err.to_string().contains("../x"));
    }
}
