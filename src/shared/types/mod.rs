pub mod errors;
pub mod ocpp_frame;

pub use errors::*;
pub use ocpp_frame::*;
