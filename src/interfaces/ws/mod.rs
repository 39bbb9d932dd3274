//! WebSocket interfaces
//!
//! - `ocpp_client`: station side of the OCPP-J socket
//! - `negotiator`: subprotocol negotiation for the server side
//! - `mock_csms`: in-process CSMS for tests and load runs

pub mod mock_csms;
pub mod negotiator;
pub mod ocpp_client;

pub use mock_csms::{
    ConnectionProfile, Fault, Latency, MockBehavior, MockControl, MockCsms, ReceivedCall,
};
pub use negotiator::ProtocolNegotiator;
pub use ocpp_client::{build_station_url, CloseInfo};
