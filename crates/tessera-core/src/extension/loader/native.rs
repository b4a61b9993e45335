//! Native extension loading for .so/.dylib/.dll files.
//!
//! A native extension must export:
//! - `tessera_extension_abi_version() -> u32`
//! - `tessera_extension_core_version() -> *const c_char` (NUL-terminated)
//! - `tessera_extension_create(type_ptr: *const u8, type_len: usize) -> *mut Box<dyn Extension>`
//!
//! Trait objects cross the boundary as Rust values, so the library has to be
//! built against the same `tessera-core` version as the host. Both version
//! exports are checked before anything is instantiated.

use std::ffi::{c_char, CStr};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libloading::{Library, Symbol};

use crate::error::{Error, Result};
use crate::extension::context::ExtensionContext;
use crate::extension::contract::{ExtResult, Extension};
use crate::extension::manifest::ExtensionType;

/// ABI version for dynamic loading.
/// Incremented when breaking changes are made to the extension interface.
pub const ABI_VERSION: u32 = 1;

/// Version of `tessera-core` the host (or extension) was compiled against.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// [`CORE_VERSION`] with a trailing NUL, for the core version export.
pub const CORE_VERSION_NUL: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

pub const ABI_VERSION_SYMBOL: &[u8] = b"tessera_extension_abi_version\0";
pub const CORE_VERSION_SYMBOL: &[u8] = b"tessera_extension_core_version\0";
pub const CREATE_SYMBOL: &[u8] = b"tessera_extension_create\0";

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type CoreVersionFn = unsafe extern "C" fn() -> *const c_char;
type CreateFn = unsafe extern "C" fn(*const u8, usize) -> *mut Box<dyn Extension>;

/// Extension instance created by a native library.
///
/// Owns the library handle so the code stays mapped for as long as the
/// instance exists. Field order matters: `inner` drops before `library`.
pub struct NativeExtension {
    inner: Box<dyn Extension>,
    library: Library,
}

impl NativeExtension {
    /// The underlying library handle.
    pub fn library(&self) -> &Library {
        &self.library
    }
}

pub(super) fn load(path: &Path, type_name: &str) -> Result<NativeExtension> {
    let violation = |reason: String| Error::ContractNotSatisfied {
        artifact: path.to_path_buf(),
        type_name: type_name.to_string(),
        reason,
    };

    // Safety: loading a library runs its initializers; extensions are trusted code.
    let library = unsafe { Library::new(path) }
        .map_err(|e| violation(format!("failed to load library: {}", e)))?;

    let inner = unsafe {
        let abi: Symbol<AbiVersionFn> = library
            .get(ABI_VERSION_SYMBOL)
            .map_err(|e| violation(format!("missing ABI version export: {}", e)))?;
        let got = abi();
        if got != ABI_VERSION {
            return Err(violation(format!(
                "ABI version mismatch: host {}, extension {}",
                ABI_VERSION, got
            )));
        }

        let core: Symbol<CoreVersionFn> = library
            .get(CORE_VERSION_SYMBOL)
            .map_err(|e| violation(format!("missing core version export: {}", e)))?;
        let core_ptr = core();
        if core_ptr.is_null() {
            return Err(violation("core version export returned null".into()));
        }
        let core_version = CStr::from_ptr(core_ptr).to_string_lossy();
        if core_version != CORE_VERSION {
            return Err(violation(format!(
                "built against tessera-core {}, host runs {}",
                core_version, CORE_VERSION
            )));
        }

        let create: Symbol<CreateFn> = library
            .get(CREATE_SYMBOL)
            .map_err(|e| violation(format!("missing create export: {}", e)))?;
        let raw = create(type_name.as_ptr(), type_name.len());
        if raw.is_null() {
            return Err(violation(format!(
                "library does not provide type '{}'",
                type_name
            )));
        }
        *Box::from_raw(raw)
    };

    tracing::info!(
        path = %path.display(),
        type_name = %type_name,
        "Native extension instantiated"
    );

    Ok(NativeExtension { inner, library })
}

#[async_trait]
impl Extension for NativeExtension {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn author(&self) -> &str {
        self.inner.author()
    }

    fn extension_type(&self) -> ExtensionType {
        self.inner.extension_type()
    }

    fn config_schema(&self) -> Option<serde_json::Value> {
        self.inner.config_schema()
    }

    fn is_compatible(&self, host_version: &semver::Version) -> bool {
        self.inner.is_compatible(host_version)
    }

    async fn initialize(&mut self, ctx: Arc<ExtensionContext>) -> ExtResult<()> {
        self.inner.initialize(ctx).await
    }

    async fn start(&mut self) -> ExtResult<()> {
        self.inner.start().await
    }

    async fn stop(&mut self) -> ExtResult<()> {
        self.inner.stop().await
    }

    async fn dispose(&mut self) -> ExtResult<()> {
        self.inner.dispose().await
    }
}
