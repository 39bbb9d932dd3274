pub mod handlers;
pub mod session;
pub mod station;

pub use handlers::{create_protocol_handler, ProtocolHandler, SharedProtocolHandler};
pub use station::{Station, StationManager};
