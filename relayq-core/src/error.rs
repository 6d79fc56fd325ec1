/// Error taxonomy for the offline queue
///
/// Every variant carries a stable machine-readable code and a retryability
/// classification that the sync engine rides on.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Conflict detected: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Checksum mismatch: {0}")]
    Integrity(String),

    #[error("Request not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for this variant. Codes land in
    /// `SyncResult.errors` and in persisted `last_error` fields, so they
    /// never change once released.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Network(_) => "NETWORK_ERROR",
            Error::Server { .. } => "SERVER_ERROR",
            Error::Conflict(_) => "CONFLICT",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Integrity(_) => "CHECKSUM_MISMATCH",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Compression(_) => "COMPRESSION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when another attempt could plausibly succeed: connectivity
    /// faults, timeouts, and 5xx-class responses. Validation and logical
    /// errors are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Network(_) => true,
            Error::Storage(_) => true,
            Error::Server { status, .. } => *status >= 500,

            Error::Validation(_) => false,
            Error::Conflict(_) => false,
            Error::Integrity(_) => false,
            Error::NotFound(_) => false,
            Error::Serialization(_) => false,
            Error::Compression(_) => false,
            Error::Internal(_) => false,
        }
    }

    /// Wrap with a caller-side context string.
    pub fn with_context(self, context: &str) -> Error {
        Error::Internal(format!("{}: {}", context, self))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
