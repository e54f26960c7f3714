//! Common error types for Stowage.

use thiserror::Error;

/// Top-level error type for Stowage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage backend operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided (unsafe name, bad configuration value).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The selected backend has no working implementation for the operation.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// The backend cannot be reached (missing credentials, no connectivity).
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

/// Coarse classification of an [`Error`], used by callers to pick a
/// transport-level response without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or unsafe input. Never reaches a backend.
    Validation,
    /// Disk or network failure in the backend.
    Io,
    /// The stored name does not resolve to an artifact.
    NotFound,
    /// The stored name is already taken.
    AlreadyExists,
    /// The backend lacks an implementation for the operation.
    NotImplemented,
    /// The backend is not reachable or not configured.
    Unavailable,
    /// Internal failure (serialization and similar).
    Internal,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) => ErrorKind::Validation,
            Error::Storage(_) => ErrorKind::Io,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::Io,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error was caused by the caller's input rather than the backend.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
