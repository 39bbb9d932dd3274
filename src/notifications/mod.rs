//! Notifications module
//!
//! Typed station events and the broadcast bus that carries them.
//!
//! # Usage
//! ```ignore
//! use ocpp_sim::notifications::{EventBus, Event, HeartbeatEvent};
//! use chrono::Utc;
//!
//! let bus = EventBus::new();
//! let mut events = bus.subscribe();
//!
//! bus.publish(Event::Heartbeat(HeartbeatEvent {
//!     station_id: "CP001".to_string(),
//!     timestamp: Utc::now(),
//! }));
//! ```
//!
//! Dropping an [`EventSubscriber`] deregisters it.

pub mod event_bus;
pub mod events;

pub use event_bus::{EventBus, EventSubscriber, MANAGER_BUS_CAPACITY, STATION_BUS_CAPACITY};
pub use events::*;
