//! Error types for the extension runtime.

use std::path::PathBuf;

use crate::extension::state::{ExtensionState, LifecycleOp, LifecyclePhase};
use crate::storage::StorageError;

/// Runtime error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid manifest '{id}': {reason}")]
    ManifestInvalid { id: String, reason: String },

    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Malformed {field} '{value}' in manifest '{id}': {reason}")]
    MalformedVersion {
        id: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Extension '{id}' requires host {required}, running {host}")]
    Incompatible {
        id: String,
        required: String,
        host: String,
    },

    #[error("Entry point '{type_name}' in {} does not satisfy the extension contract: {reason}", artifact.display())]
    ContractNotSatisfied {
        artifact: PathBuf,
        type_name: String,
        reason: String,
    },

    #[error("Extension not loaded: {0}")]
    NotLoaded(String),

    #[error("Extension '{id}' depends on '{dependency}', which is not enabled")]
    DependencyNotEnabled { id: String, dependency: String },

    #[error("Extension '{id}' is required by enabled extensions: {}", dependents.join(", "))]
    HasActiveDependents { id: String, dependents: Vec<String> },

    #[error("Cannot {operation} extension '{id}' while it is {state}")]
    InvalidTransition {
        id: String,
        state: ExtensionState,
        operation: LifecycleOp,
    },

    #[error("Extension '{id}' failed during {phase}: {message}")]
    LifecycleFault {
        id: String,
        phase: LifecyclePhase,
        message: String,
    },

    #[error("Extension '{target}' has no API named '{name}'")]
    ApiNotFound { target: String, name: String },

    #[error("API '{target}.{name}' failed: {message}")]
    ApiFailed {
        target: String,
        name: String,
        message: String,
    },

    #[error("Context of extension '{0}' has been closed")]
    ContextClosed(String),

    #[error("Extension '{id}' depends on unknown extension '{dependency}'")]
    MissingDependency { id: String, dependency: String },

    #[error("Dependency cycle among extensions: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl Error {
    /// Short reason suitable for the management surface.
    ///
    /// Unlike `Display`, this never includes paths, panic payloads or
    /// backend messages.
    pub fn reason(&self) -> String {
        match self {
            Self::ManifestInvalid { .. } => "the extension manifest is invalid".into(),
            Self::ManifestNotFound(_) => "the extension is not installed".into(),
            Self::MalformedVersion { field, .. } => {
                format!("the manifest declares a malformed {}", field)
            }
            Self::Incompatible { required, .. } => {
                format!("the extension requires host version {} or newer", required)
            }
            Self::ContractNotSatisfied { .. } => {
                "the extension code does not implement the extension contract".into()
            }
            Self::NotLoaded(_) => "the extension is not loaded".into(),
            Self::DependencyNotEnabled { dependency, .. } => {
                format!("dependency '{}' is not enabled", dependency)
            }
            Self::HasActiveDependents { dependents, .. } => {
                format!("enabled extensions depend on it: {}", dependents.join(", "))
            }
            Self::InvalidTransition {
                state, operation, ..
            } => format!("cannot {} while the extension is {}", operation, state),
            Self::LifecycleFault { phase, .. } => {
                format!("the extension failed during {}", phase)
            }
            Self::ApiNotFound { name, .. } => format!("API '{}' is not registered", name),
            Self::ApiFailed { name, .. } => format!("API '{}' failed", name),
            Self::ContextClosed(_) => "the extension has been unloaded".into(),
            Self::MissingDependency { dependency, .. } => {
                format!("dependency '{}' is not installed", dependency)
            }
            Self::DependencyCycle(_) => "the extension dependencies form a cycle".into(),
            Self::Storage(_) | Self::Repository(_) | Self::Io(_) => {
                "an internal storage error occurred".into()
            }
            Self::Serialization(_) => "data could not be serialized".into(),
        }
    }

    /// Whether the error was raised by extension code rather than the host.
    pub fn is_lifecycle_fault(&self) -> bool {
        matches!(self, Self::LifecycleFault { .. })
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
