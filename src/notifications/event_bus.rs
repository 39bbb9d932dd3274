//! Broadcast bus for station events
//!
//! Every station owns a bus. The station manager owns one more, with a
//! larger buffer, and relays each station bus into it unchanged.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::events::{Event, EventMessage};

/// Buffer of a single station's bus.
pub const STATION_BUS_CAPACITY: usize = 1024;

/// Buffer of the manager bus, which merges every station.
pub const MANAGER_BUS_CAPACITY: usize = 8192;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(STATION_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Wrap `event` with a fresh id and timestamp and broadcast it.
    pub fn publish(&self, event: Event) {
        self.publish_message(EventMessage::new(event));
    }

    /// Broadcast an already wrapped message, keeping its id and timestamp.
    pub fn publish_message(&self, message: EventMessage) {
        let event_type = message.event.event_type();
        // A send error only means nobody is subscribed right now.
        if let Ok(receivers) = self.sender.send(message) {
            debug!(event_type, receivers, "Event published");
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Live subscribers. A dropped [`EventSubscriber`] no longer counts.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of an [`EventBus`]; dropping it unsubscribes.
pub struct EventSubscriber {
    receiver: broadcast::Receiver<EventMessage>,
}

impl EventSubscriber {
    /// Next event, skipping over anything lost to lag. `None` once every
    /// publisher is gone.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<EventMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}
