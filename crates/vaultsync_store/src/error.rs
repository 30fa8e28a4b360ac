//! Error types for the reference stores.

use thiserror::Error;

/// Result type for store setup operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while opening or persisting a store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest could not be encoded or decoded.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// A blob referenced by the manifest is missing.
    #[error("missing blob for object {0}")]
    MissingBlob(String),

    /// Store root is unusable.
    #[error("invalid store root: {0}")]
    InvalidRoot(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::MissingBlob("obj-7".into());
        assert!(err.to_string().contains("obj-7"));

        let err: StoreError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(err.to_string().contains("disk"));
    }
}
