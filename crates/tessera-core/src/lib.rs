//! Tessera core: an in-process extension runtime.
//!
//! The host discovers extension manifests, validates them, loads extension
//! code, and drives each extension through
//! `initialize → start → stop → dispose`. Extensions talk to the host and to
//! each other only through their [`ExtensionContext`]: settings, namespaced
//! storage, the [`EventBus`] and the API gateway.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera_core::prelude::*;
//!
//! # async fn run() -> tessera_core::Result<()> {
//! let config = RuntimeConfig::load(std::path::Path::new("tessera.toml"))?;
//! let manager = Arc::new(ExtensionManager::from_config(&config)?);
//! for dir in &config.extension_dirs {
//!     manager.add_search_location(dir).await;
//! }
//! manager.discover_extensions().await;
//! let report = manager.load_all().await;
//! println!("loaded {} extensions", report.succeeded.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod extension;
pub mod repository;
pub mod service;
pub mod storage;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventPayload};
pub use eventbus::{EventBus, PublishReport, SharedEventBus, SubscriptionId};
pub use extension::{
    Extension, ExtensionContext, ExtensionError, ExtensionManager, ExtensionState, ExtensionStatus,
    ExtensionType, Manifest,
};
pub use repository::{ExtensionRepository, InMemoryExtensionRepository};
pub use service::{ExtensionService, OperationError};
pub use storage::{Encoding, ExtensionStorage, StorageBackend, StorageError, StoredValue};

/// Common imports for hosts and extension authors.
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, EventKind, EventPayload};
    pub use crate::eventbus::{EventBus, PublishReport, SubscriptionId};
    pub use crate::extension::{
        ContextServices, ExtResult, Extension, ExtensionContext, ExtensionError, ExtensionHandle,
        ExtensionManager, ExtensionState, ExtensionStatus, ExtensionType, ManagerOptions, Manifest,
    };
    pub use crate::repository::{ExtensionRepository, InMemoryExtensionRepository};
    pub use crate::service::{ExtensionService, OperationError};
    pub use crate::storage::{Encoding, ExtensionStorage, ScopedStorage};
}
