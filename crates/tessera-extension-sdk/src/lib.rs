//! Tessera Extension SDK
//!
//! Everything needed to build an extension as a native library (`cdylib`)
//! the Tessera host can load.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tessera_extension_sdk::prelude::*;
//!
//! #[derive(Default)]
//! pub struct Greeter {
//!     ctx: Option<Arc<ExtensionContext>>,
//! }
//!
//! #[async_trait]
//! impl Extension for Greeter {
//!     fn id(&self) -> &str { "demo.greeter" }
//!     fn name(&self) -> &str { "Greeter" }
//!     fn version(&self) -> &str { "0.1.0" }
//!
//!     async fn initialize(&mut self, ctx: Arc<ExtensionContext>) -> ExtResult<()> {
//!         ctx.register_api("greet", |args| async move {
//!             Ok(json!({ "message": format!("hello, {}", args["name"]) }))
//!         })?;
//!         self.ctx = Some(ctx);
//!         Ok(())
//!     }
//! }
//!
//! declare_extension! {
//!     "Greeter" => Greeter::default,
//! }
//! ```
//!
//! The manifest next to the library names the type:
//! `"entryPoint": { "assembly": "libgreeter.so", "type": "Greeter" }`.

pub mod export;
mod macros;

pub use async_trait::async_trait;
pub use semver;
pub use serde_json;
pub use tessera_core;

pub use tessera_core::extension::loader::{ABI_VERSION, CORE_VERSION, CORE_VERSION_NUL};
pub use tessera_core::extension::{ExtResult, Extension, ExtensionContext, ExtensionError};

/// Common imports for extension authors.
pub mod prelude {
    pub use std::sync::Arc;

    pub use async_trait::async_trait;
    pub use semver::Version;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{json, Value};
    pub use tessera_core::event::{Event, EventKind, EventPayload};
    pub use tessera_core::extension::{
        ExtResult, Extension, ExtensionContext, ExtensionError, ExtensionType,
    };
    pub use tessera_core::storage::ScopedStorage;

    pub use crate::declare_extension;
}
