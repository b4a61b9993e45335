//! Tessera extension system.
//!
//! - [`manifest`]: the `extension.json` model and its validation rules
//! - [`contract`]: the [`Extension`] trait every loadable module implements
//! - [`loader`]: resolving entry points to instances (static or native)
//! - [`context`]: the per-extension facade handed to `initialize`
//! - [`manager`]: discovery, dependency ordering and lifecycle orchestration
//!
//! # FFI Exports for Dynamic Loading
//!
//! Native extensions must export these symbols (see `tessera-extension-sdk`):
//! - `tessera_extension_abi_version()` -> u32
//! - `tessera_extension_core_version()` -> *const c_char
//! - `tessera_extension_create(type_ptr, type_len)` -> *mut Box<dyn Extension>

pub mod context;
pub mod contract;
pub mod discovery;
pub mod gateway;
pub mod graph;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod state;

pub use context::{ContextServices, ExtensionContext};
pub use contract::{DynExtension, ExtResult, Extension, ExtensionError};
pub use gateway::{api_handler, ApiGateway, ApiHandler};
pub use loader::{ExtensionFactory, ModuleRegistry};
pub use manager::{BatchReport, ExtensionHandle, ExtensionManager, ManagerOptions};
pub use manifest::{ApiDescriptor, EntryPoint, ExtensionType, Manifest, UiMountPoint, MANIFEST_FILE_NAME};
pub use state::{ExtensionState, ExtensionStatus, LifecycleOp, LifecyclePhase};
