//! Error types for the allowlist service.

use allowlist_core::StoreError;
use thiserror::Error;

/// Error type for service operations.
///
/// Ineligible addresses and missing commitments are not errors; they come
/// back as `false` or `None`.
#[derive(Error, Debug)]
pub enum Error {
    /// Store adapter failure
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking worker panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias using the service Error.
pub type Result<T> = std::result::Result<T, Error>;
