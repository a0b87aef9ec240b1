//! Cross-context notification channel.
//!
//! Consumers subscribe to a fixed set of named notifications instead of an
//! ad-hoc event emitter; the dispatcher and services publish, the embedding
//! surfaces (UI, connectors) subscribe.

use tokio::sync::broadcast;

/// Notifications published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeeperEvent {
    /// The vault was unlocked or initialized.
    Login,
    /// The vault was locked.
    Logout,
    /// The identity set or the active identity changed.
    IdentityChanged,
    /// The pending approval queue changed.
    PendingRequestsUpdated,
}

/// Broadcast bus for [`KeeperEvent`] notifications.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<KeeperEvent>,
}

impl EventBus {
    /// Creates a bus with a small buffer; slow subscribers observe lag, not
    /// backpressure on the engine.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(32);
        Self { tx }
    }

    /// Subscribes to all future notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<KeeperEvent> {
        self.tx.subscribe()
    }

    /// Publishes a notification. A bus with no subscribers drops it.
    pub fn publish(&self, event: KeeperEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
