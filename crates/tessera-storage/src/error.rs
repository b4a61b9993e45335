//! Error types for the storage crate.

use thiserror::Error;

use tessera_core::storage::StorageError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database error.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<Error> for StorageError {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => StorageError::Io(e),
            Error::Serialization(s) => StorageError::Serialization(s),
            Error::Storage(s) => StorageError::Backend(s),
            Error::InvalidInput(s) => StorageError::Configuration(s),
        }
    }
}

impl From<Error> for tessera_core::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => tessera_core::Error::Io(e),
            Error::Serialization(s) => tessera_core::Error::Serialization(s),
            other => tessera_core::Error::Repository(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

macro_rules! from_redb {
    ($($ty:ty => $what:literal),+ $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::Storage(format!(concat!("redb ", $what, ": {}"), e))
                }
            }
        )+
    };
}

from_redb! {
    redb::Error => "error",
    redb::DatabaseError => "open failed",
    redb::TransactionError => "transaction failed",
    redb::TableError => "table unavailable",
    redb::StorageError => "i/o failed",
    redb::CommitError => "commit failed",
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Storage(format!("storage task failed: {}", e))
    }
}
