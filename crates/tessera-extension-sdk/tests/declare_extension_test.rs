//! Exercises the symbols generated by `declare_extension!` in-process.

use std::ffi::CStr;

use tessera_core::extension::ContextServices;
use tessera_extension_sdk::prelude::*;
use tessera_extension_sdk::{ABI_VERSION, CORE_VERSION};

#[derive(Default)]
struct Echo {
    ctx: Option<Arc<ExtensionContext>>,
}

#[async_trait]
impl Extension for Echo {
    fn id(&self) -> &str {
        "demo.echo"
    }

    fn name(&self) -> &str {
        "Echo"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn extension_type(&self) -> ExtensionType {
        ExtensionType::Tool
    }

    async fn initialize(&mut self, ctx: Arc<ExtensionContext>) -> ExtResult<()> {
        ctx.register_api("echo", |args| async move { Ok(args) })?;
        self.ctx = Some(ctx);
        Ok(())
    }
}

struct Shout;

impl Shout {
    fn new() -> Self {
        Shout
    }
}

#[async_trait]
impl Extension for Shout {
    fn id(&self) -> &str {
        "demo.shout"
    }

    fn name(&self) -> &str {
        "Shout"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn is_compatible(&self, host_version: &Version) -> bool {
        host_version.major >= 1
    }

    async fn initialize(&mut self, _ctx: Arc<ExtensionContext>) -> ExtResult<()> {
        Ok(())
    }
}

declare_extension! {
    "Echo" => Echo::default,
    "Shout" => Shout::new,
}

fn create(type_name: &str) -> Option<Box<dyn Extension>> {
    let raw = unsafe { tessera_extension_create(type_name.as_ptr(), type_name.len()) };
    if raw.is_null() {
        None
    } else {
        Some(*unsafe { Box::from_raw(raw) })
    }
}

#[test]
fn test_version_exports_match_core() {
    assert_eq!(tessera_extension_abi_version(), ABI_VERSION);
    let core = unsafe { CStr::from_ptr(tessera_extension_core_version()) };
    assert_eq!(core.to_str().unwrap(), CORE_VERSION);
}

#[test]
fn test_create_resolves_each_declared_type() {
    assert_eq!(create("Echo").unwrap().id(), "demo.echo");
    assert_eq!(create("Shout").unwrap().id(), "demo.shout");
    assert!(create("Whisper").is_none());
}

#[test]
fn test_created_extension_reports_compatibility() {
    let shout = create("Shout").unwrap();
    assert!(!shout.is_compatible(&Version::new(0, 9, 0)));
    assert!(shout.is_compatible(&Version::new(1, 0, 0)));
    assert!(create("Echo").unwrap().is_compatible(&Version::new(0, 1, 0)));
}

#[tokio::test]
async fn test_created_extension_serves_its_api() {
    let mut ext = create("Echo").unwrap();
    let ctx = Arc::new(ExtensionContext::new(
        "demo.echo",
        Value::Null,
        ContextServices::new(std::env::temp_dir()),
    ));
    ext.initialize(ctx.clone()).await.unwrap();

    let reply = ctx
        .call_api("demo.echo", "echo", json!({ "text": "hi" }))
        .await
        .unwrap();
    assert_eq!(reply, json!({ "text": "hi" }));
}
