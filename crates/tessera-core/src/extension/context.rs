//! Per-extension context.
//!
//! Each load builds a fresh [`ExtensionContext`] and hands it to the
//! extension's `initialize`. It is the extension's only door into the host:
//! logging span, settings, storage, events, directories and the API
//! gateway. Unloading invalidates it.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::contract::ExtResult;
use super::gateway::{api_handler, ApiGateway, ApiHandler};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, EventPayload};
use crate::eventbus::{HandlerResult, PublishReport, SharedEventBus, SubscriptionId};
use crate::storage::{ExtensionStorage, ScopedStorage};

/// Host services shared by every context.
#[derive(Clone)]
pub struct ContextServices {
    pub event_bus: SharedEventBus,
    pub storage: Arc<ExtensionStorage>,
    pub gateway: Arc<ApiGateway>,
    /// Parent of the per-extension data directories.
    pub data_root: PathBuf,
    /// Parent of the per-extension temp directories.
    pub temp_root: PathBuf,
}

impl ContextServices {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            event_bus: Arc::new(crate::eventbus::EventBus::new()),
            storage: Arc::new(ExtensionStorage::in_memory()),
            gateway: Arc::new(ApiGateway::new()),
            data_root: data_root.into(),
            temp_root: std::env::temp_dir().join("tessera"),
        }
    }

    pub fn with_event_bus(mut self, event_bus: SharedEventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_storage(mut self, storage: Arc<ExtensionStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }
}

/// Facade handed to one extension instance.
pub struct ExtensionContext {
    extension_id: String,
    span: tracing::Span,
    settings: Value,
    services: ContextServices,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
    closed: AtomicBool,
}

impl ExtensionContext {
    /// `settings` is the extension's own configuration section.
    pub fn new(extension_id: impl Into<String>, settings: Value, services: ContextServices) -> Self {
        let extension_id = extension_id.into();
        let span = tracing::info_span!("extension", extension_id = %extension_id);
        Self {
            extension_id,
            span,
            settings,
            services,
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Span every log line of this extension should be emitted in.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Raw settings section.
    pub fn settings(&self) -> &Value {
        &self.settings
    }

    /// Bind the settings at a dotted `section` path to `T`.
    ///
    /// An empty path binds the whole section. A missing section yields
    /// `T::default()`; a section that does not fit `T` is logged and also
    /// yields the default.
    pub fn config<T>(&self, section: &str) -> T
    where
        T: DeserializeOwned + Default,
    {
        let mut node = &self.settings;
        for part in section.split('.').filter(|p| !p.is_empty()) {
            match node.get(part) {
                Some(child) => node = child,
                None => return T::default(),
            }
        }
        if node.is_null() {
            return T::default();
        }

        match T::deserialize(node) {
            Ok(value) => value,
            Err(e) => {
                self.span.in_scope(|| {
                    tracing::warn!(
                        section = %section,
                        error = %e,
                        "Malformed configuration section, using defaults"
                    )
                });
                T::default()
            }
        }
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.services.event_bus
    }

    /// Storage scoped to this extension's id.
    pub fn storage(&self) -> ScopedStorage {
        ScopedStorage::new(self.extension_id.clone(), self.services.storage.clone())
    }

    /// The store every extension shares, addressed by explicit id.
    pub fn shared_storage(&self) -> Arc<ExtensionStorage> {
        self.services.storage.clone()
    }

    /// This extension's data directory, created on first use.
    pub fn data_dir(&self) -> Result<PathBuf> {
        ensure_dir(&self.services.data_root, &self.extension_id)
    }

    /// This extension's scratch directory, created on first use.
    pub fn temp_dir(&self) -> Result<PathBuf> {
        ensure_dir(&self.services.temp_root, &self.extension_id)
    }

    /// Call another extension's API.
    pub async fn call_api(&self, target: &str, name: &str, args: Value) -> Result<Value> {
        self.ensure_open()?;
        self.services.gateway.call(target, name, args).await
    }

    /// Publish an endpoint other extensions can call as `(own id, name)`.
    pub fn register_api<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExtResult<Value>> + Send + 'static,
    {
        self.register_api_handler(name, api_handler(handler))
    }

    pub fn register_api_handler(&self, name: &str, handler: ApiHandler) -> Result<()> {
        self.ensure_open()?;
        self.services
            .gateway
            .register(&self.extension_id, name, handler);
        Ok(())
    }

    /// Subscribe to `kind`. The subscription is removed when the context
    /// is invalidated.
    pub fn subscribe<F, Fut>(&self, kind: EventKind, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.ensure_open()?;
        let id = self.services.event_bus.subscribe(kind.clone(), handler);
        self.subscriptions.lock().push((kind, id));
        Ok(id)
    }

    pub fn unsubscribe(&self, kind: &EventKind, id: SubscriptionId) -> bool {
        self.subscriptions
            .lock()
            .retain(|(k, sub)| !(k == kind && *sub == id));
        self.services.event_bus.unsubscribe(kind, id)
    }

    /// Publish an event sourced from this extension.
    pub async fn publish(&self, payload: EventPayload) -> Result<PublishReport> {
        self.ensure_open()?;
        let event = Event::from_extension(self.extension_id.clone(), payload);
        Ok(self.services.event_bus.publish(event).await)
    }

    /// Publish a custom event sourced from this extension.
    pub async fn emit(&self, name: impl Into<String>, data: Value) -> Result<PublishReport> {
        self.publish(EventPayload::Custom {
            name: name.into(),
            data,
        })
        .await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the context: drop registered APIs and tracked subscriptions.
    /// Later API calls and registrations fail with `ContextClosed`.
    pub(crate) fn invalidate(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let apis = self.services.gateway.clear(&self.extension_id);
        let subscriptions: Vec<_> = std::mem::take(&mut *self.subscriptions.lock());
        for (kind, id) in &subscriptions {
            self.services.event_bus.unsubscribe(kind, *id);
        }
        self.span.in_scope(|| {
            tracing::debug!(
                apis,
                subscriptions = subscriptions.len(),
                "Extension context invalidated"
            )
        });
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ContextClosed(self.extension_id.clone()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("extension_id", &self.extension_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn ensure_dir(root: &Path, extension_id: &str) -> Result<PathBuf> {
    let dir = root.join(dir_name(extension_id));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Directory name for an id: anything outside `[A-Za-z0-9._-]` becomes `_`,
/// and a leading dot is escaped so ids like `..` cannot leave the root.
fn dir_name(extension_id: &str) -> String {
    let mut name: String = extension_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with('.') {
        name.insert(0, '_');
    }
    name
}
