//! Async event bus — fan-out of gateway events to any number of observers.
//!
//! Uses a `tokio::sync::broadcast` channel: every subscriber sees every
//! event published after it subscribed.

use tokio::sync::broadcast;
use tracing::trace;

use super::types::GatewayEvent;

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// The event bus connecting the gateway manager to its observers.
///
/// Publishing never blocks and never fails: with no subscribers the event
/// is simply dropped. A subscriber that falls behind by more than the
/// capacity loses the oldest events.
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Create a new event bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    /// Publish an event to every current subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: GatewayEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => n,
            Err(_) => {
                trace!(event = name, "no bus subscribers, event dropped");
                0
            }
        }
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
