//! Common error types for MarkVault.

use thiserror::Error;

/// Top-level error type for MarkVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Wrong password or corrupted ciphertext. The two causes are
    /// intentionally indistinguishable.
    #[error("Authentication failed")]
    AuthenticationFailure,

    /// A cryptographic primitive (KDF, cipher, RNG) failed unexpectedly.
    #[error("Cryptographic primitive failure: {0}")]
    PrimitiveFailure(String),

    /// No node lives at the given index path.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Move rejected (cycle, self-reference or bad destination).
    #[error("Invalid move: {0}")]
    InvalidMove(String),

    /// The target of a folder-only operation is a bookmark.
    #[error("Not a folder: {0}")]
    NotAFolder(String),

    /// Persisted or imported data does not have the expected shape.
    #[error("Malformed persisted data: {0}")]
    MalformedPersistedData(String),

    /// The session has been locked and its key material cleared.
    #[error("Session is locked")]
    Locked,

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether this error is a rejected structural edit that leaves the
    /// tree untouched.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::PathNotFound(_) | Error::InvalidMove(_) | Error::NotAFolder(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_failure_message_is_generic() {
        let msg = Error::AuthenticationFailure.to_string();
        assert!(!msg.to_lowercase().contains("password"));
        assert!(!msg.to_lowercase().contains("corrupt"));
    }

    #[test]
    fn test_structural_errors() {
        assert!(Error::PathNotFound("0/1".into()).is_structural());
        assert!(Error::InvalidMove("cycle".into()).is_structural());
        assert!(Error::NotAFolder("2".into()).is_structural());
        assert!(!Error::Locked.is_structural());
        assert!(!Error::AuthenticationFailure.is_structural());
    }
}
