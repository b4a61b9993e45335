//! Key-value storage namespaced by extension id.
//!
//! [`StorageBackend`] is the byte-level seam: tables are extension ids, keys
//! are whatever the extension chooses. [`ExtensionStorage`] layers typed
//! access on top and records how each value was encoded.

mod kv;
mod memory;

pub use kv::{Encoding, ExtensionStorage, ScopedStorage, StoredValue};
pub use memory::MemoryBackend;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error types.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Byte-level storage backend.
///
/// Implemented in-process by [`MemoryBackend`] and persistently by the
/// redb backend in `tessera-storage`.
pub trait StorageBackend: Send + Sync {
    /// Write a value to a key in the specified table.
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Read a value by key from the specified table.
    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key. Returns whether it existed.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// All entries of `table` whose key starts with `prefix`, sorted by key.
    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Whether data survives a process restart.
    fn is_persistent(&self) -> bool;
}
