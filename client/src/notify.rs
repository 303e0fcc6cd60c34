//! Observer registry for "state changed" notifications.
//!
//! Views that show bookmarks subscribe once and re-query the store whenever
//! an event arrives. Any number of observers may be registered.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// What changed the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// First pull of a device that held no rows
    Bootstrap,
    /// Catch-up pull of a device that already held rows
    Pull,
    /// A delta from the real-time stream
    Realtime,
    /// A create, edit or delete on this device
    LocalMutation,
}

/// Notification delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    StateChanged { source: ChangeSource },
}

/// A registered observer.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub events: mpsc::UnboundedReceiver<SyncEvent>,
}

/// Registry of observers.
///
/// Thread-safe and can be shared via `Arc`.
#[derive(Debug, Default)]
pub struct Notifier {
    observers: DashMap<String, mpsc::UnboundedSender<SyncEvent>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new notifier wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register an observer.
    pub fn subscribe(&self) -> Subscription {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.insert(id.clone(), tx);

        tracing::debug!(observer = %id, "Observer subscribed");

        Subscription { id, events: rx }
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let removed = self.observers.remove(id).is_some();
        if removed {
            tracing::debug!(observer = %id, "Observer unsubscribed");
        }
        removed
    }

    /// Deliver an event to every observer, pruning those whose receiver
    /// was dropped.
    ///
    /// Returns the number of observers that received the event.
    pub fn publish(&self, event: SyncEvent) -> usize {
        let mut delivered = 0;
        self.observers.retain(|_, sender| {
            let open = sender.send(event).is_ok();
            delivered += usize::from(open);
            open
        });

        tracing::trace!(?event, delivered, "Published event");

        delivered
    }

    /// Publish `StateChanged` from `source`.
    pub fn state_changed(&self, source: ChangeSource) -> usize {
        self.publish(SyncEvent::StateChanged { source })
    }

    /// Get the number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}
