//! Persistent storage for the Tessera extension runtime.
//!
//! - [`RedbBackend`]: a [`StorageBackend`] for extension key-value data
//! - [`RedbExtensionRepository`]: installed extensions and their status
//!
//! Both can share one database file; [`open_storage`] wires them up from a
//! [`RuntimeConfig`].

use std::sync::Arc;

use tessera_core::config::StorageKind;
use tessera_core::storage::{MemoryBackend, StorageBackend};
use tessera_core::{ExtensionRepository, InMemoryExtensionRepository, RuntimeConfig};

pub mod backends;
pub mod error;
pub mod extensions;

pub use backends::{create_backend, open_database, RedbBackend, RedbBackendConfig};
pub use error::{Error, Result};
pub use extensions::RedbExtensionRepository;

/// Storage selected by the runtime configuration.
#[derive(Clone)]
pub struct StorageStack {
    pub backend: Arc<dyn StorageBackend>,
    pub repository: Arc<dyn ExtensionRepository>,
}

/// Open the configured storage.
///
/// The redb backend and repository share the database at
/// [`RuntimeConfig::storage_path`]. The memory variant keeps nothing across
/// restarts.
pub fn open_storage(config: &RuntimeConfig) -> Result<StorageStack> {
    match config.storage.backend {
        StorageKind::Memory => Ok(StorageStack {
            backend: Arc::new(MemoryBackend::new()),
            repository: Arc::new(InMemoryExtensionRepository::new()),
        }),
        StorageKind::Redb => {
            let path = config.storage_path();
            let db = open_database(&path, true)?;
            tracing::info!(path = %path.display(), "Using redb storage");
            Ok(StorageStack {
                backend: Arc::new(RedbBackend::from_database(db.clone(), path)),
                repository: Arc::new(RedbExtensionRepository::from_database(db)?),
            })
        }
    }
}
