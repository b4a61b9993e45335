//! Extension manager.
//!
//! The manager owns the manifest cache and the table of loaded extensions
//! and is the only component that mutates them. It drives every lifecycle
//! transition:
//!
//! - operations on one id are serialized by a per-id async mutex held for
//!   the whole operation; different ids proceed concurrently;
//! - every call into extension code runs under a timeout and with panics
//!   caught, so a misbehaving extension ends in `Error` instead of taking
//!   the host down;
//! - lifecycle events are published from a spawned task, so handlers may
//!   call back into the manager.
//!
//! Dependency checks read the state of *other* ids without taking their
//! locks. A dependency that is being disabled while a dependent is being
//! enabled can therefore slip through; the window is one lifecycle call.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tracing::Instrument;

use super::context::{ContextServices, ExtensionContext};
use super::contract::{DynExtension, ExtResult};
use super::discovery;
use super::graph;
use super::loader::{panic_message, ModuleRegistry};
use super::manifest::{ExtensionType, Manifest};
use super::state::{ExtensionState, LifecycleOp, LifecyclePhase};
use crate::config::{RuntimeConfig, DEFAULT_LIFECYCLE_TIMEOUT_SECS};
use crate::error::{Error, Result};
use crate::event::{Event, EventPayload};
use crate::eventbus::SharedEventBus;
use crate::storage::ExtensionStorage;

/// Tunables of an [`ExtensionManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Version extensions are checked against.
    pub host_version: semver::Version,
    /// Upper bound for each `initialize`/`start`/`stop`/`dispose` call.
    pub lifecycle_timeout: Duration,
    /// Settings handed to each extension's context, by id.
    pub settings: HashMap<String, serde_json::Value>,
}

impl ManagerOptions {
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            host_version: config.host_version()?,
            lifecycle_timeout: config.lifecycle_timeout(),
            settings: config.extensions.clone(),
        })
    }

    pub fn with_lifecycle_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle_timeout = timeout;
        self
    }

    pub fn with_host_version(mut self, version: semver::Version) -> Self {
        self.host_version = version;
        self
    }

    pub fn with_settings(mut self, id: impl Into<String>, settings: serde_json::Value) -> Self {
        self.settings.insert(id.into(), settings);
        self
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        let host_version = semver::Version::parse(super::loader::CORE_VERSION)
            .unwrap_or_else(|_| semver::Version::new(0, 0, 0));
        Self {
            host_version,
            lifecycle_timeout: Duration::from_secs(DEFAULT_LIFECYCLE_TIMEOUT_SECS),
            settings: HashMap::new(),
        }
    }
}

/// A loaded extension, as handed out by queries.
#[derive(Clone)]
pub struct ExtensionHandle {
    pub manifest: Arc<Manifest>,
    pub state: ExtensionState,
    pub loaded_at: DateTime<Utc>,
    pub instance: DynExtension,
    pub context: Arc<ExtensionContext>,
}

impl ExtensionHandle {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}

impl std::fmt::Debug for ExtensionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionHandle")
            .field("id", &self.manifest.id)
            .field("version", &self.manifest.version)
            .field("state", &self.state)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of a batch operation.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, Error)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn record(&mut self, id: &str, result: Result<()>) {
        match result {
            Ok(()) => self.succeeded.push(id.to_string()),
            Err(e) => self.failed.push((id.to_string(), e)),
        }
    }
}

/// Entry of the loaded table.
struct LoadedExtension {
    instance: DynExtension,
    manifest: Arc<Manifest>,
    context: Arc<ExtensionContext>,
    loaded_at: DateTime<Utc>,
}

/// Discovers, loads and drives extensions.
pub struct ExtensionManager {
    search_locations: RwLock<Vec<PathBuf>>,
    manifests: RwLock<HashMap<String, Arc<Manifest>>>,
    loaded: RwLock<HashMap<String, LoadedExtension>>,
    states: DashMap<String, ExtensionState>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    last_errors: DashMap<String, String>,
    modules: Arc<ModuleRegistry>,
    services: ContextServices,
    options: ManagerOptions,
}

impl ExtensionManager {
    pub fn new(services: ContextServices, options: ManagerOptions) -> Self {
        Self {
            search_locations: RwLock::new(Vec::new()),
            manifests: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashMap::new()),
            states: DashMap::new(),
            locks: DashMap::new(),
            last_errors: DashMap::new(),
            modules: Arc::new(ModuleRegistry::new()),
            services,
            options,
        }
    }

    /// Build a manager from runtime configuration, with in-memory storage.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        let services =
            ContextServices::new(config.data_dir.clone()).with_temp_root(config.temp_root());
        Ok(Self::new(services, ManagerOptions::from_config(config)?))
    }

    /// Share a module registry with other managers.
    pub fn with_modules(mut self, modules: Arc<ModuleRegistry>) -> Self {
        self.modules = modules;
        self
    }

    /// Registry used to resolve entry points; register static modules here.
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.services.event_bus
    }

    pub fn storage(&self) -> &Arc<ExtensionStorage> {
        &self.services.storage
    }

    pub fn host_version(&self) -> &semver::Version {
        &self.options.host_version
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Add a directory to scan. Missing paths are skipped with a warning.
    ///
    /// Returns whether the location was added.
    pub async fn add_search_location(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Extension search location does not exist");
            return false;
        }
        let mut locations = self.search_locations.write().await;
        if locations.iter().any(|p| p == path) {
            return false;
        }
        tracing::info!(path = %path.display(), "Added extension search location");
        locations.push(path.to_path_buf());
        true
    }

    pub async fn search_locations(&self) -> Vec<PathBuf> {
        self.search_locations.read().await.clone()
    }

    /// Scan all search locations and merge valid manifests into the cache.
    ///
    /// Invalid manifests are logged and skipped. When an id turns up more
    /// than once, the last one found wins. Returns every cached manifest.
    pub async fn discover_extensions(&self) -> Vec<Arc<Manifest>> {
        let locations = self.search_locations().await;
        let found = tokio::task::spawn_blocking(move || {
            locations
                .iter()
                .flat_map(|location| discovery::scan_location(location))
                .collect::<Vec<_>>()
        })
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Extension discovery task failed");
            Vec::new()
        });

        let mut scanned: HashMap<String, Manifest> = HashMap::new();
        for manifest in found {
            if let Some(previous) = scanned.get(&manifest.id) {
                tracing::warn!(
                    extension_id = %manifest.id,
                    kept = %manifest.version,
                    replaced = %previous.version,
                    "Duplicate extension id found during discovery"
                );
            }
            scanned.insert(manifest.id.clone(), manifest);
        }

        let count = scanned.len();
        let mut cache = self.manifests.write().await;
        for (id, manifest) in scanned {
            cache.insert(id, Arc::new(manifest));
        }
        tracing::info!(discovered = count, total = cache.len(), "Extension discovery finished");

        let mut all: Vec<_> = cache.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Validate a manifest and add it to the cache directly.
    pub async fn register_manifest(&self, manifest: Manifest) -> Result<Arc<Manifest>> {
        manifest.validate(&manifest.code_root())?;
        let manifest = Arc::new(manifest);
        self.manifests
            .write()
            .await
            .insert(manifest.id.clone(), manifest.clone());
        Ok(manifest)
    }

    /// Cached manifest of `id`.
    pub async fn manifest(&self, id: &str) -> Option<Arc<Manifest>> {
        self.manifests.read().await.get(id).cloned()
    }

    /// All cached manifests, ordered by id.
    pub async fn manifests(&self) -> Vec<Arc<Manifest>> {
        let mut all: Vec<_> = self.manifests.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Topological order of `ids` and their transitive dependencies.
    pub async fn load_order(&self, ids: &[String]) -> Result<Vec<String>> {
        let manifests = self.manifests.read().await;
        graph::dependency_order(&manifests, ids)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Observed state of `id`; `Unloaded` for unknown ids.
    pub fn state(&self, id: &str) -> ExtensionState {
        self.states.get(id).map(|s| *s).unwrap_or_default()
    }

    /// Message of the most recent failure of `id`, cleared by a successful load.
    pub fn last_error(&self, id: &str) -> Option<String> {
        self.last_errors.get(id).map(|e| e.value().clone())
    }

    pub async fn is_loaded(&self, id: &str) -> bool {
        self.loaded.read().await.contains_key(id)
    }

    /// Ids of loaded extensions, sorted.
    pub async fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.loaded.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn get_extension(&self, id: &str) -> Option<ExtensionHandle> {
        self.loaded
            .read()
            .await
            .get(id)
            .map(|record| self.handle(record))
    }

    /// Loaded extensions of one type, ordered by id.
    pub async fn get_extensions_by_type(&self, extension_type: ExtensionType) -> Vec<ExtensionHandle> {
        let mut handles: Vec<_> = self
            .loaded
            .read()
            .await
            .values()
            .filter(|record| record.manifest.extension_type == extension_type)
            .map(|record| self.handle(record))
            .collect();
        handles.sort_by(|a, b| a.manifest.id.cmp(&b.manifest.id));
        handles
    }

    fn handle(&self, record: &LoadedExtension) -> ExtensionHandle {
        ExtensionHandle {
            manifest: record.manifest.clone(),
            state: self.state(&record.manifest.id),
            loaded_at: record.loaded_at,
            instance: record.instance.clone(),
            context: record.context.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Load, instantiate and initialize `id`. A no-op if already loaded.
    ///
    /// The extension only enters the loaded table once `initialize` has
    /// succeeded; any failure leaves it unloaded.
    pub async fn load_extension(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.load_locked(id).await
        };
        self.release_lock(id, lock);
        result
    }

    /// Start `id`. Every dependency must already be enabled.
    pub async fn enable_extension(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.enable_locked(id).await
        };
        self.release_lock(id, lock);
        result
    }

    /// Stop `id`. Refused while an enabled extension depends on it.
    pub async fn disable_extension(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.disable_locked(id).await
        };
        self.release_lock(id, lock);
        result
    }

    /// Disable if needed, dispose and drop `id`. A no-op if not loaded.
    pub async fn unload_extension(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.unload_locked(id).await
        };
        self.release_lock(id, lock);
        result
    }

    /// Unload, re-read the manifest file and load again, re-enabling if the
    /// extension was enabled before. A failed load leaves it unloaded.
    pub async fn reload_extension(&self, id: &str) -> Result<()> {
        let lock = self.lock_for(id);
        let result = {
            let _guard = lock.lock().await;
            self.reload_locked(id).await
        };
        self.release_lock(id, lock);
        result
    }

    async fn load_locked(&self, id: &str) -> Result<()> {
        if self.loaded.read().await.contains_key(id) {
            let state = self.state(id);
            if !state.accepts(LifecycleOp::Load) {
                return Err(Error::InvalidTransition {
                    id: id.to_string(),
                    state,
                    operation: LifecycleOp::Load,
                });
            }
            tracing::debug!(extension_id = %id, "Extension already loaded");
            return Ok(());
        }

        let manifest = self
            .manifest(id)
            .await
            .ok_or_else(|| Error::ManifestNotFound(id.to_string()))?;

        self.set_state(id, ExtensionState::Loading);
        match self.instantiate(&manifest).await {
            Ok(record) => {
                self.loaded.write().await.insert(id.to_string(), record);
                self.set_state(id, ExtensionState::Loaded);
                self.last_errors.remove(id);
                tracing::info!(
                    extension_id = %id,
                    version = %manifest.version,
                    "Extension loaded"
                );
                self.emit(EventPayload::ExtensionLoaded {
                    extension_id: id.to_string(),
                    version: manifest.version.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.states.remove(id);
                self.record_failure(id, &e);
                Err(e)
            }
        }
    }

    async fn instantiate(&self, manifest: &Arc<Manifest>) -> Result<LoadedExtension> {
        let id = manifest.id.as_str();
        let mut instance = self
            .modules
            .instantiate(&manifest.artifact_path(), &manifest.entry_point.type_name)
            .map_err(|e| match e {
                Error::LifecycleFault { phase, message, .. } => Error::LifecycleFault {
                    id: id.to_string(),
                    phase,
                    message,
                },
                other => other,
            })?;

        if instance.id() != id {
            tracing::warn!(
                extension_id = %id,
                instance_id = %instance.id(),
                "Extension instance reports a different id than its manifest"
            );
        }

        let host = &self.options.host_version;
        if !manifest.is_compatible_with(host) || !instance.is_compatible(host) {
            return Err(Error::Incompatible {
                id: id.to_string(),
                required: manifest
                    .minimum_host_version
                    .clone()
                    .unwrap_or_else(|| "a different version".to_string()),
                host: host.to_string(),
            });
        }

        let settings = self
            .options
            .settings
            .get(id)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let context = Arc::new(ExtensionContext::new(id, settings, self.services.clone()));

        let initialized = self
            .invoke(id, LifecyclePhase::Initialize, instance.initialize(context.clone()))
            .await;
        if let Err(e) = initialized {
            context.invalidate();
            return Err(e);
        }

        Ok(LoadedExtension {
            instance: Arc::new(RwLock::new(instance)),
            manifest: manifest.clone(),
            context,
            loaded_at: Utc::now(),
        })
    }

    async fn enable_locked(&self, id: &str) -> Result<()> {
        let (manifest, instance) = self.record_parts(id).await?;
        let state = self.state(id);
        if state == ExtensionState::Enabled {
            return Ok(());
        }
        if !state.accepts(LifecycleOp::Enable) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                state,
                operation: LifecycleOp::Enable,
            });
        }

        if let Some(dependency) = manifest
            .dependencies
            .iter()
            .find(|dep| self.state(dep) != ExtensionState::Enabled)
        {
            return Err(Error::DependencyNotEnabled {
                id: id.to_string(),
                dependency: dependency.clone(),
            });
        }

        self.set_state(id, ExtensionState::Enabling);
        let result = {
            let mut ext = instance.write().await;
            self.invoke(id, LifecyclePhase::Start, ext.start()).await
        };
        match result {
            Ok(()) => {
                self.set_state(id, ExtensionState::Enabled);
                tracing::info!(extension_id = %id, "Extension enabled");
                self.emit(EventPayload::ExtensionEnabled {
                    extension_id: id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.set_state(id, ExtensionState::Error);
                self.record_failure(id, &e);
                Err(e)
            }
        }
    }

    async fn disable_locked(&self, id: &str) -> Result<()> {
        let (_, instance) = self.record_parts(id).await?;
        let state = self.state(id);
        if state.is_at_rest() {
            return Ok(());
        }
        if state != ExtensionState::Enabled {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                state,
                operation: LifecycleOp::Disable,
            });
        }

        let dependents = self.active_dependents(id).await;
        if !dependents.is_empty() {
            return Err(Error::HasActiveDependents {
                id: id.to_string(),
                dependents,
            });
        }

        self.set_state(id, ExtensionState::Disabling);
        let result = {
            let mut ext = instance.write().await;
            self.invoke(id, LifecyclePhase::Stop, ext.stop()).await
        };
        match result {
            Ok(()) => {
                self.set_state(id, ExtensionState::Disabled);
                tracing::info!(extension_id = %id, "Extension disabled");
                self.emit(EventPayload::ExtensionDisabled {
                    extension_id: id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.set_state(id, ExtensionState::Error);
                self.record_failure(id, &e);
                Err(e)
            }
        }
    }

    async fn unload_locked(&self, id: &str) -> Result<()> {
        if !self.loaded.read().await.contains_key(id) {
            return Ok(());
        }

        let state = self.state(id);
        if state == ExtensionState::Enabled {
            self.disable_locked(id).await?;
        } else if !state.accepts(LifecycleOp::Unload) {
            return Err(Error::InvalidTransition {
                id: id.to_string(),
                state,
                operation: LifecycleOp::Unload,
            });
        }

        self.set_state(id, ExtensionState::Unloading);
        let Some(record) = self.loaded.write().await.remove(id) else {
            self.states.remove(id);
            return Ok(());
        };

        let result = {
            let mut ext = record.instance.write().await;
            self.invoke(id, LifecyclePhase::Dispose, ext.dispose()).await
        };
        record.context.invalidate();
        drop(record);
        self.states.remove(id);

        tracing::info!(extension_id = %id, "Extension unloaded");
        self.emit(EventPayload::ExtensionUnloaded {
            extension_id: id.to_string(),
        });

        if let Err(e) = &result {
            self.record_failure(id, e);
        }
        result
    }

    async fn reload_locked(&self, id: &str) -> Result<()> {
        let was_enabled = self.state(id) == ExtensionState::Enabled;

        match self.unload_locked(id).await {
            Ok(()) => {}
            // Dispose failed but the extension is gone; carry on.
            Err(e) if e.is_lifecycle_fault() && !self.is_loaded(id).await => {
                tracing::warn!(extension_id = %id, error = %e, "Continuing reload after dispose failure");
            }
            Err(e) => return Err(e),
        }

        let cached = self
            .manifest(id)
            .await
            .ok_or_else(|| Error::ManifestNotFound(id.to_string()))?;
        if let Some(path) = cached.manifest_path().filter(|p| p.is_file()) {
            let fresh = tokio::task::spawn_blocking(move || discovery::read_manifest(&path))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
            match fresh {
                Ok(manifest) if manifest.id == id => {
                    self.manifests
                        .write()
                        .await
                        .insert(id.to_string(), Arc::new(manifest));
                }
                Ok(manifest) => {
                    return Err(Error::ManifestInvalid {
                        id: id.to_string(),
                        reason: format!("manifest file now declares id '{}'", manifest.id),
                    });
                }
                Err(e) => {
                    self.record_failure(id, &e);
                    return Err(e);
                }
            }
        } else {
            cached.validate(&cached.code_root()).inspect_err(|e| {
                self.record_failure(id, e);
            })?;
        }

        self.load_locked(id).await?;
        if was_enabled {
            self.enable_locked(id).await?;
        }
        tracing::info!(extension_id = %id, "Extension reloaded");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Batch operations
    // ------------------------------------------------------------------

    /// Load every cached extension, dependencies first. Failures are
    /// reported per id and never stop the batch.
    pub async fn load_all(&self) -> BatchReport {
        let ids: Vec<String> = self.manifests.read().await.keys().cloned().collect();
        let (order, mut report) = self.batch_order(&ids).await;
        for id in order {
            let result = self.load_extension(&id).await;
            report.record(&id, result);
        }
        report
    }

    /// Load and enable `ids` plus their dependencies, in dependency order.
    pub async fn enable_all(&self, ids: &[String]) -> BatchReport {
        let (order, mut report) = self.batch_order(ids).await;
        for id in order {
            let result = match self.load_extension(&id).await {
                Ok(()) => self.enable_extension(&id).await,
                Err(e) => Err(e),
            };
            report.record(&id, result);
        }
        report
    }

    /// Disable and unload everything, dependents first.
    pub async fn shutdown(&self) -> BatchReport {
        let loaded = self.loaded_ids().await;
        let mut manifests = self.manifests.read().await.clone();
        for record in self.loaded.read().await.values() {
            manifests.insert(record.manifest.id.clone(), record.manifest.clone());
        }

        let mut order = match graph::dependency_order(&manifests, &loaded) {
            Ok(order) => order.into_iter().filter(|id| loaded.contains(id)).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot order shutdown by dependencies");
                loaded.clone()
            }
        };
        order.reverse();

        let mut report = BatchReport::default();
        for id in order {
            let result = self.unload_extension(&id).await;
            report.record(&id, result);
        }
        tracing::info!(
            unloaded = report.succeeded.len(),
            failed = report.failed.len(),
            "Extension manager shut down"
        );
        report
    }

    /// Split `ids` into a loadable order and the ids whose dependency
    /// graph cannot be resolved.
    async fn batch_order(&self, ids: &[String]) -> (Vec<String>, BatchReport) {
        let manifests = self.manifests.read().await.clone();
        let mut report = BatchReport::default();
        let mut roots = Vec::new();
        for id in ids {
            match graph::dependency_order(&manifests, std::slice::from_ref(id)) {
                Ok(_) => roots.push(id.clone()),
                Err(e) => {
                    tracing::warn!(extension_id = %id, error = %e, "Skipping extension");
                    report.failed.push((id.clone(), e));
                }
            }
        }
        roots.sort();
        let order = graph::dependency_order(&manifests, &roots).unwrap_or(roots);
        (order, report)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_string()).or_default().clone()
    }

    /// Drop the lock entry of an id that is no longer tracked, unless
    /// another operation is waiting on it.
    fn release_lock(&self, id: &str, lock: Arc<Mutex<()>>) {
        self.locks.remove_if(id, |_, entry| {
            Arc::ptr_eq(entry, &lock)
                && Arc::strong_count(entry) == 2
                && !self.states.contains_key(id)
        });
    }

    fn set_state(&self, id: &str, state: ExtensionState) {
        self.states.insert(id.to_string(), state);
    }

    async fn record_parts(&self, id: &str) -> Result<(Arc<Manifest>, DynExtension)> {
        self.loaded
            .read()
            .await
            .get(id)
            .map(|record| (record.manifest.clone(), record.instance.clone()))
            .ok_or_else(|| Error::NotLoaded(id.to_string()))
    }

    /// Loaded extensions that depend on `id` and are enabled or enabling.
    async fn active_dependents(&self, id: &str) -> Vec<String> {
        let loaded = self.loaded.read().await;
        let active = loaded.values().map(|r| &r.manifest).filter(|m| {
            matches!(
                self.state(&m.id),
                ExtensionState::Enabled | ExtensionState::Enabling
            )
        });
        graph::direct_dependents(id, active)
    }

    /// Run one lifecycle call with a timeout and panic isolation.
    async fn invoke<F>(&self, id: &str, phase: LifecyclePhase, call: F) -> Result<()>
    where
        F: Future<Output = ExtResult<()>>,
    {
        let timeout = self.options.lifecycle_timeout;
        let span = tracing::info_span!("lifecycle", extension_id = %id, phase = %phase);
        let guarded = AssertUnwindSafe(call).catch_unwind().instrument(span);

        let message = match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(Ok(()))) => return Ok(()),
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(panic)) => format!("panicked: {}", panic_message(panic.as_ref())),
            Err(_) => format!("timed out after {:?}", timeout),
        };
        Err(Error::LifecycleFault {
            id: id.to_string(),
            phase,
            message,
        })
    }

    fn record_failure(&self, id: &str, error: &Error) {
        self.last_errors.insert(id.to_string(), error.to_string());
        match error {
            Error::LifecycleFault { phase, message, .. } => {
                tracing::error!(
                    extension_id = %id,
                    phase = %phase,
                    error = %message,
                    "Extension lifecycle fault"
                );
                self.emit(EventPayload::ExtensionFailed {
                    extension_id: id.to_string(),
                    phase: *phase,
                    message: message.clone(),
                });
            }
            other => {
                tracing::warn!(extension_id = %id, error = %other, "Extension operation failed");
            }
        }
    }

    /// Publish a host event without blocking the caller.
    fn emit(&self, payload: EventPayload) {
        let bus = self.services.event_bus.clone();
        let event = Event::new(payload);
        tokio::spawn(async move {
            bus.publish(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_search_location_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ExtensionManager::new(
            ContextServices::new(dir.path().join("data")),
            ManagerOptions::default(),
        );

        assert!(manager.add_search_location(dir.path()).await);
        assert!(!manager.add_search_location(dir.path()).await);
        assert!(!manager.add_search_location(dir.path().join("missing")).await);
        assert_eq!(manager.search_locations().await, vec![dir.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ExtensionManager::new(
            ContextServices::new(dir.path()),
            ManagerOptions::default(),
        );

        assert!(matches!(
            manager.load_extension("ghost").await,
            Err(Error::ManifestNotFound(_))
        ));
        assert!(matches!(
            manager.enable_extension("ghost").await,
            Err(Error::NotLoaded(_))
        ));
        assert!(matches!(
            manager.disable_extension("ghost").await,
            Err(Error::NotLoaded(_))
        ));
        manager.unload_extension("ghost").await.unwrap();
        assert_eq!(manager.state("ghost"), ExtensionState::Unloaded);
        assert!(manager.get_extension("ghost").await.is_none());
        assert!(manager.locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_entry_kept_while_waited_on() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ExtensionManager::new(
            ContextServices::new(dir.path()),
            ManagerOptions::default(),
        );

        let waiter = manager.lock_for("ghost");
        manager.load_extension("ghost").await.unwrap_err();
        assert_eq!(manager.locks.len(), 1);

        manager.release_lock("ghost", waiter);
        assert!(manager.locks.is_empty());
    }

    #[test]
    fn test_options_from_config() {
        let mut config = RuntimeConfig::default();
        config.lifecycle_timeout_secs = 3;
        config.host_version = Some("1.2.3".into());
        config
            .extensions
            .insert("a".into(), serde_json::json!({ "k": 1 }));

        let options = ManagerOptions::from_config(&config).unwrap();
        assert_eq!(options.lifecycle_timeout, Duration::from_secs(3));
        assert_eq!(options.host_version, semver::Version::new(1, 2, 3));
        assert_eq!(options.settings["a"]["k"], 1);
    }
}
