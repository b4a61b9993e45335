//! Storage backend implementations.

use std::sync::Arc;

use serde_json::Value;
use tessera_core::storage::{MemoryBackend, Result, StorageBackend, StorageError};

pub mod redb;

pub use self::redb::{open_database, RedbBackend, RedbBackendConfig};

/// Create a storage backend by type identifier.
///
/// ```no_run
/// use tessera_storage::backends::create_backend;
/// use serde_json::json;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = create_backend("redb", &json!({ "path": "./data/tessera.redb" }))?;
/// assert!(backend.is_persistent());
/// # Ok(())
/// # }
/// ```
pub fn create_backend(backend_type: &str, config: &Value) -> Result<Arc<dyn StorageBackend>> {
    match backend_type {
        "redb" => {
            let cfg: RedbBackendConfig = serde_json::from_value(config.clone()).map_err(|e| {
                StorageError::Configuration(format!("Invalid redb config: {}", e))
            })?;
            Ok(Arc::new(RedbBackend::new(cfg)?))
        }
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        _ => Err(StorageError::Configuration(format!(
            "Unknown backend type: {}. Available backends: {}",
            backend_type,
            available_backends().join(", ")
        ))),
    }
}

pub fn available_backends() -> Vec<&'static str> {
    vec!["redb", "memory"]
}
