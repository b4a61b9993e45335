//! Shared fixtures: a configurable probe extension and an on-disk
//! extension directory wired to a manager.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tessera_core::extension::{ContextServices, ManagerOptions, MANIFEST_FILE_NAME};
use tessera_core::prelude::*;

pub const PROBE_TYPE: &str = "Probe";

/// What a probe does when a lifecycle method is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    Fail,
    Panic,
    Hang,
    /// Succeed after a delay.
    Slow(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub initialize: Fault,
    pub start: Fault,
    pub stop: Fault,
    pub dispose: Fault,
}

impl Behavior {
    pub fn slow_initialize(delay: Duration) -> Self {
        Self {
            initialize: Fault::Slow(delay),
            ..Default::default()
        }
    }

    pub fn failing_start() -> Self {
        Self {
            start: Fault::Fail,
            ..Default::default()
        }
    }
}

/// Call counters shared between a probe and the test.
#[derive(Debug, Default)]
pub struct Calls {
    pub initialize: AtomicUsize,
    pub start: AtomicUsize,
    pub stop: AtomicUsize,
    pub dispose: AtomicUsize,
    pub pings: AtomicUsize,
}

impl Calls {
    pub fn starts(&self) -> usize {
        self.start.load(Ordering::SeqCst)
    }
    pub fn stops(&self) -> usize {
        self.stop.load(Ordering::SeqCst)
    }
    pub fn initializes(&self) -> usize {
        self.initialize.load(Ordering::SeqCst)
    }
    pub fn disposes(&self) -> usize {
        self.dispose.load(Ordering::SeqCst)
    }
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

pub struct Probe {
    id: String,
    behavior: Behavior,
    calls: Arc<Calls>,
    ctx: Option<Arc<ExtensionContext>>,
}

impl Probe {
    async fn act(&self, fault: Fault, phase: &str) -> ExtResult<()> {
        match fault {
            Fault::None => Ok(()),
            Fault::Fail => Err(ExtensionError::ExecutionFailed(format!("{} refused", phase))),
            Fault::Panic => panic!("probe panicked in {}", phase),
            Fault::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Fault::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Extension for Probe {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Probe"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&mut self, ctx: Arc<ExtensionContext>) -> ExtResult<()> {
        self.calls.initialize.fetch_add(1, Ordering::SeqCst);
        let id = self.id.clone();
        ctx.register_api("whoami", move |_| {
            let id = id.clone();
            async move { Ok(serde_json::Value::from(id)) }
        })?;
        let calls = self.calls.clone();
        ctx.subscribe(EventKind::custom("ping"), move |_| {
            let calls = calls.clone();
            async move {
                calls.pings.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })?;
        self.ctx = Some(ctx);
        self.act(self.behavior.initialize, "initialize").await
    }

    async fn start(&mut self) -> ExtResult<()> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        self.act(self.behavior.start, "start").await
    }

    async fn stop(&mut self) -> ExtResult<()> {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        self.act(self.behavior.stop, "stop").await
    }

    async fn dispose(&mut self) -> ExtResult<()> {
        self.calls.dispose.fetch_add(1, Ordering::SeqCst);
        self.act(self.behavior.dispose, "dispose").await
    }
}

/// A temp extension directory plus a manager scanning it.
pub struct Fixture {
    pub dir: TempDir,
    pub manager: Arc<ExtensionManager>,
    options: ManagerOptions,
    calls: HashMap<String, Arc<Calls>>,
    behaviors: HashMap<String, Behavior>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_options(ManagerOptions::default())
    }

    pub fn with_options(options: ManagerOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("extensions")).unwrap();
        Self {
            manager: Self::manager_in(dir.path(), options.clone()),
            options,
            dir,
            calls: HashMap::new(),
            behaviors: HashMap::new(),
        }
    }

    fn manager_in(root: &Path, options: ManagerOptions) -> Arc<ExtensionManager> {
        let services = ContextServices::new(root.join("data")).with_temp_root(root.join("tmp"));
        Arc::new(ExtensionManager::new(services, options))
    }

    /// Replace the manager with a fresh one, as after a host restart.
    /// Probe modules are registered again with new counters; nothing is
    /// discovered or loaded.
    pub fn restart(&mut self) {
        self.manager = Self::manager_in(self.dir.path(), self.options.clone());
        let behaviors: Vec<_> = self.behaviors.drain().collect();
        for (id, behavior) in behaviors {
            self.register_probe(&id, behavior);
        }
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.dir.path().join("extensions")
    }

    pub fn artifact(&self, id: &str) -> PathBuf {
        self.extensions_dir().join(id).join(format!("{}.ext", id))
    }

    /// Write `extension.json` plus an artifact and register a probe for it.
    pub fn add(&mut self, id: &str, deps: &[&str], behavior: Behavior) -> Arc<Calls> {
        let manifest = serde_json::json!({
            "id": id,
            "name": format!("Probe {}", id),
            "version": "1.0.0",
            "type": "tool",
            "entryPoint": { "assembly": format!("{}.ext", id), "type": PROBE_TYPE },
            "dependencies": deps,
        });
        self.add_manifest(id, manifest, behavior)
    }

    pub fn add_manifest(&mut self, id: &str, manifest: serde_json::Value, behavior: Behavior) -> Arc<Calls> {
        let ext_dir = self.extensions_dir().join(id);
        std::fs::create_dir_all(&ext_dir).unwrap();
        std::fs::write(self.artifact(id), b"probe").unwrap();
        std::fs::write(ext_dir.join(MANIFEST_FILE_NAME), manifest.to_string()).unwrap();
        self.register_probe(id, behavior)
    }

    fn register_probe(&mut self, id: &str, behavior: Behavior) -> Arc<Calls> {
        self.behaviors.insert(id.to_string(), behavior.clone());
        let calls = Arc::new(Calls::default());
        let factory_calls = calls.clone();
        let probe_id = id.to_string();
        self.manager
            .modules()
            .register_static(&format!("{}.ext", id), PROBE_TYPE, move || {
                Box::new(Probe {
                    id: probe_id.clone(),
                    behavior: behavior.clone(),
                    calls: factory_calls.clone(),
                    ctx: None,
                })
            });
        self.calls.insert(id.to_string(), calls.clone());
        calls
    }

    pub async fn discover(&self) -> Vec<Arc<Manifest>> {
        self.manager.add_search_location(self.extensions_dir()).await;
        self.manager.discover_extensions().await
    }

    pub fn calls(&self, id: &str) -> Arc<Calls> {
        self.calls[id].clone()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
