//! Per-station OCPP session plumbing
//!
//! - [`PendingCallRegistry`] correlates outbound CALLs with their answers.
//! - [`OcppSession`] owns the registry and the writer of the current socket.
//! - [`HeartbeatScheduler`] drives the periodic `Heartbeat` CALL.

pub mod connection;
pub mod heartbeat;
pub mod ocpp_session;
pub mod pending;

pub use connection::{Connection, OutboundMessage};
pub use heartbeat::HeartbeatScheduler;
pub use ocpp_session::OcppSession;
pub use pending::{PendingCallRegistry, DEFAULT_CALL_TIMEOUT};
