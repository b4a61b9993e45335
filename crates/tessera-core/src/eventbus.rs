//! In-process publish/subscribe event bus.
//!
//! Handlers subscribe to an [`EventKind`]. Publishing an event runs every
//! handler registered for its kind on its own tokio task and waits for all
//! of them; a failing or panicking handler never affects the others or the
//! publisher.
//!
//! Hosts that want every event regardless of kind (a realtime push layer,
//! an audit log) can [`EventBus::tap`] the bus instead.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::event::{Event, EventKind};
use crate::extension::ExtensionError;

/// Default channel capacity for the tap channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Result a handler reports back to the bus.
pub type HandlerResult = std::result::Result<(), ExtensionError>;

/// Type-erased event handler.
pub type EventHandler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

/// Identifies one subscription on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

impl PublishReport {
    pub fn total(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Kind-keyed event broker.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// The capacity bounds how many events a slow tap may fall behind.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tx,
        }
    }

    /// Register a handler for `kind`.
    pub fn subscribe<F, Fut>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| handler(event).boxed());
        self.subscribe_handler(kind, handler)
    }

    /// Register an already type-erased handler.
    pub fn subscribe_handler(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(kind = %kind, subscription = %id, "Handler subscribed");
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove exactly the handler registered under `id`.
    ///
    /// Returns whether it was found.
    pub fn unsubscribe(&self, kind: &EventKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(kind);
        }
        removed
    }

    /// Remove every handler for `kind`. Returns how many were removed.
    pub fn unsubscribe_all(&self, kind: &EventKind) -> usize {
        self.handlers
            .write()
            .remove(kind)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Number of handlers currently registered for `kind`.
    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.handlers.read().get(kind).map(Vec::len).unwrap_or(0)
    }

    /// Deliver `event` to every handler of its kind and wait for them.
    ///
    /// No bus lock is held while handlers run, so handlers may subscribe,
    /// unsubscribe or publish themselves.
    pub async fn publish(&self, event: Event) -> PublishReport {
        self.publish_arc(Arc::new(event)).await
    }

    pub async fn publish_arc(&self, event: Arc<Event>) -> PublishReport {
        let kind = event.kind();
        let handlers: Vec<(SubscriptionId, EventHandler)> = self
            .handlers
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        // Taps are best effort; no receivers is not an error.
        let _ = self.tx.send(event.clone());

        if handlers.is_empty() {
            return PublishReport::default();
        }

        let tasks = handlers.into_iter().map(|(id, handler)| {
            let event = event.clone();
            let task = tokio::spawn(async move { handler(event).await });
            async move { (id, task.await) }
        });

        let mut report = PublishReport::default();
        for (id, outcome) in join_all(tasks).await {
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        kind = %kind,
                        subscription = %id,
                        error = %e,
                        "Event handler failed"
                    );
                }
                Err(join_err) => {
                    report.failed += 1;
                    tracing::error!(
                        kind = %kind,
                        subscription = %id,
                        panicked = join_err.is_panic(),
                        "Event handler aborted"
                    );
                }
            }
        }
        report
    }

    /// Receive every published event, regardless of kind.
    pub fn tap(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live taps.
    pub fn tap_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half of [`EventBus::tap`].
pub struct EventBusReceiver {
    rx: broadcast::Receiver<Arc<Event>>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is dropped. Events missed because the
    /// receiver fell behind are skipped.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event tap lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use std::sync::atomic::AtomicUsize;

    fn counter_handler(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn(Arc<Event>) -> BoxFuture<'static, HandlerResult> + Send + Sync + 'static {
        move |_event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_each_handler_invoked_once() {
        let bus = EventBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::MessageSent, counter_handler(first.clone()));
        bus.subscribe(EventKind::MessageSent, counter_handler(second.clone()));

        let report = bus
            .publish(Event::new(EventPayload::MessageSent {
                conversation_id: "c1".into(),
                message_id: "m1".into(),
                content: serde_json::Value::Null,
            }))
            .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_kinds_not_invoked() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::custom("a"), counter_handler(hits.clone()));

        let report = bus.publish(Event::custom("b", serde_json::Value::Null)).await;
        assert_eq!(report.total(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_isolated() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::custom("x"), |_e| async {
            Err(ExtensionError::ExecutionFailed("nope".into()))
        });
        bus.subscribe(EventKind::custom("x"), |e: Arc<Event>| async move {
            if e.source_extension_id.is_none() {
                panic!("handler blew up");
            }
            Ok(())
        });
        bus.subscribe(EventKind::custom("x"), counter_handler(hits.clone()));

        let report = bus.publish(Event::custom("x", serde_json::Value::Null)).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_exact_handler() {
        let bus = EventBus::new();
        let kept = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::custom("x"), counter_handler(kept.clone()));
        let id = bus.subscribe(EventKind::custom("x"), counter_handler(dropped.clone()));

        assert!(bus.unsubscribe(&EventKind::custom("x"), id));
        assert!(!bus.unsubscribe(&EventKind::custom("x"), id));
        bus.publish(Event::custom("x", serde_json::Value::Null)).await;

        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!(bus.handler_count(&EventKind::custom("x")), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_all() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::custom("x"), counter_handler(hits.clone()));
        bus.subscribe(EventKind::custom("x"), counter_handler(hits.clone()));

        assert_eq!(bus.unsubscribe_all(&EventKind::custom("x")), 2);
        let report = bus.publish(Event::custom("x", serde_json::Value::Null)).await;
        assert_eq!(report.total(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tap_sees_every_event() {
        let bus = EventBus::new();
        let mut tap = bus.tap();
        assert_eq!(bus.tap_count(), 1);

        bus.publish(Event::custom("a", serde_json::Value::Null)).await;
        bus.publish(Event::custom("b", serde_json::Value::Null)).await;

        assert_eq!(tap.recv().await.unwrap().kind(), EventKind::custom("a"));
        assert_eq!(tap.recv().await.unwrap().kind(), EventKind::custom("b"));
        assert!(tap.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_handler_may_publish() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(EventKind::custom("second"), counter_handler(hits.clone()));

        let inner = bus.clone();
        bus.subscribe(EventKind::custom("first"), move |_e| {
            let bus = inner.clone();
            async move {
                bus.publish(Event::custom("second", serde_json::Value::Null))
                    .await;
                Ok(())
            }
        });

        let report = bus.publish(Event::custom("first", serde_json::Value::Null)).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
