//! DataTransfer handler
//!
//! The simulator implements no vendor extensions.

use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::types::DataTransferStatus;
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::OcppVersion;

pub async fn handle_data_transfer(
    handler: &OcppHandlerV16,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: DataTransferRequest = parse_request(OcppVersion::V16, "DataTransfer", payload)?;

    info!(
        station_id = %handler.station_id(),
        vendor_id = req.vendor_string.as_str(),
        message_id = ?req.message_id,
        "DataTransfer"
    );

    InboundReply::typed(&DataTransferResponse {
        status: DataTransferStatus::UnknownVendorId,
        data: None,
    })
}
