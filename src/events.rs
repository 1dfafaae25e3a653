//! In-process publish/subscribe for device lifecycle events.
//!
//! Three fixed event kinds, typed payloads, best-effort delivery. The kinds
//! are a closed enum rather than string keys, so subscribing to a
//! nonexistent event is a compile error instead of a runtime one.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::device::RegisteredCamera;

/// Kinds of device events the bus can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A registered device became connected.
    Connect,
    /// A registered device became disconnected.
    Disconnect,
    /// Any status transition (fires alongside Connect/Disconnect).
    StatusChange,
}

impl EventKind {
    /// All event kinds, for iteration.
    pub const ALL: [Self; 3] = [Self::Connect, Self::Disconnect, Self::StatusChange];
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Disconnect => write!(f, "disconnect"),
            Self::StatusChange => write!(f, "status_change"),
        }
    }
}

/// Callback invoked with the affected device record.
///
/// Handlers are shared `Arc`s so the same handler value can be subscribed,
/// deduplicated, and unsubscribed by pointer identity.
pub type EventHandler = Arc<dyn Fn(&RegisteredCamera) + Send + Sync>;

/// Thread-safe event bus for camera lifecycle events.
///
/// Delivery is best-effort: a handler that panics is caught and logged and
/// does not prevent later handlers from running. The emit path snapshots the
/// subscriber list before invoking, so subscriptions changed mid-emit do not
/// affect the in-flight emission.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<EventHandler>>>,
}

impl EventBus {
    /// Create an event bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to an event kind.
    ///
    /// Subscribing the identical handler (same `Arc`) twice is a no-op.
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) {
        let mut subs = self.subscribers.lock().expect("event bus lock poisoned");
        let list = subs.entry(kind).or_default();
        if list.iter().any(|existing| Arc::ptr_eq(existing, &handler)) {
            debug!(%kind, "Handler already subscribed, ignoring");
            return;
        }
        list.push(handler);
        debug!(%kind, count = list.len(), "Subscribed handler");
    }

    /// Remove a previously subscribed handler. Unknown handlers are ignored.
    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) {
        let mut subs = self.subscribers.lock().expect("event bus lock poisoned");
        if let Some(list) = subs.get_mut(&kind) {
            list.retain(|existing| !Arc::ptr_eq(existing, handler));
            debug!(%kind, count = list.len(), "Unsubscribed handler");
        }
    }

    /// Remove all handlers for one kind, or for every kind when `None`.
    pub fn clear(&self, kind: Option<EventKind>) {
        let mut subs = self.subscribers.lock().expect("event bus lock poisoned");
        match kind {
            Some(kind) => {
                subs.remove(&kind);
                debug!(%kind, "Cleared subscribers");
            }
            None => {
                subs.clear();
                debug!("Cleared all subscribers");
            }
        }
    }

    /// Number of handlers subscribed to a kind.
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let subs = self.subscribers.lock().expect("event bus lock poisoned");
        subs.get(&kind).map_or(0, Vec::len)
    }

    /// Emit an event to every subscriber of `kind`, in subscription order.
    pub fn emit(&self, kind: EventKind, device: &RegisteredCamera) {
        // Snapshot under the lock, invoke outside it. Handlers may call back
        // into the bus without deadlocking.
        let handlers: Vec<EventHandler> = {
            let subs = self.subscribers.lock().expect("event bus lock poisoned");
            subs.get(&kind).cloned().unwrap_or_default()
        };

        debug!(%kind, stable_id = %device.stable_id, subscribers = handlers.len(), "Emitting event");

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(device))) {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(%kind, stable_id = %device.stable_id, %reason, "Event handler panicked");
            }
        }
    }
}
