use kiln_types::{Cid, TypeError};
use thiserror::Error;

/// Errors from storage backend operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend holds no bundle with this identifier.
    #[error("bundle not found: {0}")]
    BundleNotFound(Cid),

    /// A remote backend answered with a non-success status.
    #[error("HTTP {status}: {text}")]
    Http { status: u16, text: String },

    /// The request never produced a response (connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// A header or bundle name is not usable as a file or URL component.
    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid backend configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error from the local filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TypeError> for StorageError {
    fn from(e: TypeError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
