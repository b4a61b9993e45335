//! Module registry: resolves an entry point to an extension instance.
//!
//! Two kinds of modules are supported:
//! - **static** factories registered in-process, keyed by artifact file name
//!   and type name (embedded extensions, tests);
//! - **native** libraries (.so, .dylib, .dll) exporting the Tessera ABI.

mod native;

pub use native::{
    NativeExtension, ABI_VERSION, ABI_VERSION_SYMBOL, CORE_VERSION, CORE_VERSION_NUL,
    CORE_VERSION_SYMBOL, CREATE_SYMBOL,
};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use super::contract::Extension;
use super::state::LifecyclePhase;
use crate::error::{Error, Result};

/// Constructor of a static extension.
pub type ExtensionFactory = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Check if a path is a native library for the current platform.
pub fn is_native_library(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str());
    match std::env::consts::OS {
        "macos" => ext == Some("dylib"),
        "windows" => ext == Some("dll"),
        _ => ext == Some("so"),
    }
}

/// Resolves `(artifact, type name)` pairs to fresh instances.
#[derive(Default)]
pub struct ModuleRegistry {
    statics: RwLock<HashMap<(String, String), ExtensionFactory>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a static factory for `artifact` (a file name such as
    /// `echo.ext`) and `type_name`. Replaces an earlier registration.
    pub fn register_static<F>(&self, artifact: &str, type_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.statics.write().insert(
            (artifact.to_string(), type_name.to_string()),
            Arc::new(factory),
        );
    }

    pub fn has_static(&self, artifact: &str, type_name: &str) -> bool {
        self.statics
            .read()
            .contains_key(&(artifact.to_string(), type_name.to_string()))
    }

    /// Produce a new instance for the entry point.
    ///
    /// A static registration for the artifact's file name takes precedence
    /// over opening the artifact as a native library.
    pub fn instantiate(&self, artifact: &Path, type_name: &str) -> Result<Box<dyn Extension>> {
        let file_name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        let factory = self
            .statics
            .read()
            .get(&(file_name, type_name.to_string()))
            .cloned();

        if let Some(factory) = factory {
            return std::panic::catch_unwind(AssertUnwindSafe(|| factory())).map_err(|panic| {
                Error::LifecycleFault {
                    id: type_name.to_string(),
                    phase: LifecyclePhase::Instantiate,
                    message: panic_message(panic.as_ref()),
                }
            });
        }

        if is_native_library(artifact) {
            return native::load(artifact, type_name)
                .map(|ext| Box::new(ext) as Box<dyn Extension>);
        }

        Err(Error::ContractNotSatisfied {
            artifact: artifact.to_path_buf(),
            type_name: type_name.to_string(),
            reason: "no static module is registered for it and it is not a native library"
                .into(),
        })
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
