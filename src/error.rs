//! Error type shared by every layer of the crate.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbError>;

/// Every failure the index, the row store and the engine can report.
#[derive(Debug, Error)]
pub enum DbError {
    /// Bad tree order, malformed range or unusable input value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Put on a key that is already indexed.
    #[error("duplicate key")]
    DuplicateKey,
    /// Get or Remove on a key that is not indexed.
    #[error("key not found")]
    KeyNotFound,
    /// Node buffers could not be reserved; the tree was left untouched.
    #[error("allocation failure")]
    AllocationFailure,
    /// A structural invariant was found broken.
    #[error("internal error: {0}")]
    InternalError(String),
    /// I/O error from the row store or snapshot file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Bytes read from disk failed validation.
    #[error("corruption detected: {0}")]
    Corruption(String),
    /// The ingestion source could not be parsed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// The configuration file could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl DbError {
    /// Stable status code for reporting to callers outside the library.
    pub fn status(&self) -> &'static str {
        match self {
            DbError::InvalidArgument(_) | DbError::Config(_) => "INVALID_ARGUMENT",
            DbError::DuplicateKey => "DUPLICATE_KEY",
            DbError::KeyNotFound => "KEY_NOT_FOUND",
            DbError::AllocationFailure => "ALLOCATION_FAILURE",
            DbError::InternalError(_) => "INTERNAL_ERROR",
            DbError::Io(_) => "IO_ERROR",
            DbError::Corruption(_) | DbError::Csv(_) => "CORRUPTION",
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        DbError::InvalidArgument(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        DbError::InternalError(message.into())
    }

    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        DbError::Corruption(message.into())
    }
}

impl From<std::collections::TryReserveError> for DbError {
    fn from(_: std::collections::TryReserveError) -> Self {
        DbError::AllocationFailure
    }
}
