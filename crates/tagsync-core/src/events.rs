//! Store change events and the broadcast bus that distributes them.
//!
//! Stores that can observe their own writes (the in-memory store, or an HTTP
//! store fed by a listener) publish a [`StoreEvent`] per changed document.
//! Tag feeds subscribe to reload when documents of their type change.

use serde::Serialize;
use tokio::sync::broadcast;

/// A document changed in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    Created {
        document_id: String,
        document_type: Option<String>,
    },
    Patched {
        document_id: String,
        document_type: Option<String>,
    },
    Deleted {
        document_id: String,
        document_type: Option<String>,
    },
}

impl StoreEvent {
    /// Dot-namespaced event type name (e.g., `"document.patched"`).
    pub fn event_type(&self) -> &'static str {
        match self {
            StoreEvent::Created { .. } => "document.created",
            StoreEvent::Patched { .. } => "document.patched",
            StoreEvent::Deleted { .. } => "document.deleted",
        }
    }

    pub fn document_id(&self) -> &str {
        match self {
            StoreEvent::Created { document_id, .. }
            | StoreEvent::Patched { document_id, .. }
            | StoreEvent::Deleted { document_id, .. } => document_id,
        }
    }

    pub fn document_type(&self) -> Option<&str> {
        match self {
            StoreEvent::Created { document_type, .. }
            | StoreEvent::Patched { document_type, .. }
            | StoreEvent::Deleted { document_type, .. } => document_type.as_deref(),
        }
    }

    /// Whether the event concerns a document of `doc_type`.
    ///
    /// Events with an unknown type match every type.
    pub fn concerns(&self, doc_type: &str) -> bool {
        self.document_type().map_or(true, |t| t == doc_type)
    }
}

/// Broadcast-based event bus for store change events.
///
/// Slow receivers that fall behind receive a `Lagged` error and miss events;
/// feeds treat a lag as "something changed" and reload.
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: StoreEvent) {
        tracing::trace!(
            event_type = event.event_type(),
            document_id = event.document_id(),
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
