//! V201 DataTransfer handler

use rust_ocpp::v2_0_1::enumerations::data_transfer_status_enum_type::DataTransferStatusEnumType;
use rust_ocpp::v2_0_1::messages::datatransfer::{DataTransferRequest, DataTransferResponse};
use serde_json::Value;
use tracing::info;

use crate::application::handlers::{parse_request, InboundError, InboundReply, ProtocolHandler};
use crate::application::handlers::OcppHandlerV201;
use crate::domain::OcppVersion;

pub async fn handle_data_transfer(
    handler: &OcppHandlerV201,
    payload: Value,
) -> Result<InboundReply, InboundError> {
    let req: DataTransferRequest = parse_request(OcppVersion::V201, "DataTransfer", payload)?;

    info!(
        station_id = %handler.station_id(),
        vendor_id = req.vendor_id.as_str(),
        message_id = ?req.message_id,
        "V201 DataTransfer"
    );

    InboundReply::typed(&DataTransferResponse {
        status: DataTransferStatusEnumType::UnknownVendorId,
        data: None,
        status_info: None,
    })
}
