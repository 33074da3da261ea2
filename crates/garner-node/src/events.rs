//! The node event bus.
//!
//! One broadcast channel carrying the typed events from every pipeline.
//! Lossy for lagging subscribers; emitting with no subscribers is fine.

use garner_types::events::Event;
use tokio::sync::broadcast;

/// Default bus capacity, events.
const BUS_CAPACITY: usize = 1024;

/// Broadcasts pipeline events to any number of subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// The raw sender, for services that emit directly.
    pub fn sender(&self) -> broadcast::Sender<Event> {
        self.sender.clone()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
