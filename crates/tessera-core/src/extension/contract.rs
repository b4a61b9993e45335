//! The behavioural contract every loadable extension satisfies.

use std::sync::Arc;

use async_trait::async_trait;

use super::context::ExtensionContext;
use super::manifest::ExtensionType;

/// Error returned by extension code.
///
/// The manager wraps it into [`crate::Error::LifecycleFault`] together
/// with the extension id and the failing phase.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Timeout")]
    Timeout,

    /// A host call made by the extension failed.
    #[error(transparent)]
    Host(#[from] crate::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type for extension code.
pub type ExtResult<T> = std::result::Result<T, ExtensionError>;

/// An extension instance.
///
/// Lifecycle methods are called by the manager, one at a time per instance:
/// `initialize` once after instantiation, then any number of
/// `start`/`stop` pairs, then `dispose` once.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Stable identifier. Expected to match the manifest id.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Semver version string.
    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn author(&self) -> &str {
        ""
    }

    fn extension_type(&self) -> ExtensionType {
        ExtensionType::GenericExtension
    }

    /// JSON schema of the settings the extension reads through its context.
    fn config_schema(&self) -> Option<serde_json::Value> {
        None
    }

    /// Whether this build can run inside `host_version`.
    fn is_compatible(&self, _host_version: &semver::Version) -> bool {
        true
    }

    /// Receive the context and prepare resources. No work should run yet.
    async fn initialize(&mut self, ctx: Arc<ExtensionContext>) -> ExtResult<()>;

    /// Begin active work.
    async fn start(&mut self) -> ExtResult<()> {
        Ok(())
    }

    /// Cease active work. Must leave the instance restartable.
    async fn stop(&mut self) -> ExtResult<()> {
        Ok(())
    }

    /// Release everything acquired in `initialize`.
    async fn dispose(&mut self) -> ExtResult<()> {
        Ok(())
    }
}

/// Shared handle to a live extension instance.
pub type DynExtension = Arc<tokio::sync::RwLock<Box<dyn Extension>>>;
