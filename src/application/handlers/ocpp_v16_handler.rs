//! OCPP 1.6J protocol handler
//!
//! Station-side messages are flat JSON objects keyed by `connectorId`.
//! Configuration is a flat key/value table served through
//! GetConfiguration / ChangeConfiguration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, ChargePointErrorCode, ChargePointStatus, IdTagInfo, Measurand,
    MeterValue, ReadingContext, RegistrationStatus, SampledValue, UnitOfMeasure,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use super::ocpp_v16::action_matcher;
use super::{
    exchange, meter_reading, wire_enum, HandlerCore, InboundError, InboundReply, ProtocolHandler,
    StartAck,
};
use crate::application::station::StationContext;
use crate::domain::configuration::{ConfigStore, Mutability, ValueKind};
use crate::domain::{
    BootOutcome, BootStatus, ConnectorStatus, MeterSample, OcppVersion, StopReason, Transaction,
};
use crate::shared::OcppError;

pub(crate) const KEY_HEARTBEAT_INTERVAL: &str = "HeartbeatInterval";
pub(crate) const KEY_METER_SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";
pub(crate) const KEY_AUTHORIZE_REMOTE: &str = "AuthorizeRemoteTxRequests";
pub(crate) const KEY_STOP_ON_INVALID_ID: &str = "StopTransactionOnInvalidId";

/// Handler for OCPP 1.6J stations
pub struct OcppHandlerV16 {
    core: HandlerCore,
    pub(crate) configuration: Mutex<ConfigStore<String>>,
}

impl OcppHandlerV16 {
    pub fn new(ctx: Arc<StationContext>) -> Self {
        let configuration = Mutex::new(default_configuration(&ctx));
        Self {
            core: HandlerCore::new(ctx),
            configuration,
        }
    }

    async fn config_u64(&self, key: &str) -> Option<u64> {
        self.configuration
            .lock()
            .await
            .get(&key.to_string())
            .and_then(|e| e.as_u64())
    }

    async fn config_bool(&self, key: &str) -> Option<bool> {
        self.configuration
            .lock()
            .await
            .get(&key.to_string())
            .and_then(|e| e.as_bool())
    }
}

fn default_configuration(ctx: &StationContext) -> ConfigStore<String> {
    use Mutability::{ReadOnly, ReadWrite};
    use ValueKind::{Boolean, Integer, Text};

    let heartbeat = ctx
        .config
        .heartbeat_interval
        .unwrap_or_else(|| ctx.settings.default_heartbeat_interval.as_secs());

    let mut store = ConfigStore::new();
    store
        .insert(KEY_HEARTBEAT_INTERVAL.into(), heartbeat.to_string(), ReadWrite, Integer)
        .insert(
            KEY_METER_SAMPLE_INTERVAL.into(),
            ctx.settings.meter_sample_interval.as_secs().to_string(),
            ReadWrite,
            Integer,
        )
        .insert(
            "ConnectionTimeOut".into(),
            ctx.settings.connect_timeout.as_secs().to_string(),
            ReadWrite,
            Integer,
        )
        .insert(
            "NumberOfConnectors".into(),
            ctx.config.connector_count.to_string(),
            ReadOnly,
            Integer,
        )
        .insert(KEY_AUTHORIZE_REMOTE.into(), "false", ReadWrite, Boolean)
        .insert(KEY_STOP_ON_INVALID_ID.into(), "true", ReadWrite, Boolean)
        .insert(
            "MeterValuesSampledData".into(),
            "Energy.Active.Import.Register,Power.Active.Import",
            ReadWrite,
            Text,
        )
        .insert(
            "SupportedFeatureProfiles".into(),
            "Core,SmartCharging,RemoteTrigger",
            ReadOnly,
            Text,
        )
        .insert(
            "ChargeProfileMaxStackLevel".into(),
            crate::domain::charging_profile::model::DEFAULT_MAX_STACK_LEVEL.to_string(),
            ReadOnly,
            Integer,
        );
    store
}

fn charge_point_status(status: ConnectorStatus) -> ChargePointStatus {
    match status {
        ConnectorStatus::Available => ChargePointStatus::Available,
        ConnectorStatus::Preparing => ChargePointStatus::Preparing,
        ConnectorStatus::Charging => ChargePointStatus::Charging,
        ConnectorStatus::SuspendedEV => ChargePointStatus::SuspendedEV,
        ConnectorStatus::SuspendedEVSE => ChargePointStatus::SuspendedEVSE,
        ConnectorStatus::Finishing => ChargePointStatus::Finishing,
        ConnectorStatus::Reserved => ChargePointStatus::Reserved,
        ConnectorStatus::Unavailable => ChargePointStatus::Unavailable,
        ConnectorStatus::Faulted => ChargePointStatus::Faulted,
    }
}

/// `sampledValue` entries for one meter sample.
pub(crate) fn sampled_values(sample: &MeterSample, context: ReadingContext) -> Vec<SampledValue> {
    let sampled = |value: String, measurand: Measurand, unit: UnitOfMeasure| SampledValue {
        value,
        context: Some(context.clone()),
        format: None,
        measurand: Some(measurand),
        phase: None,
        location: None,
        unit: Some(unit),
    };
    vec![
        sampled(
            sample.energy_wh.to_string(),
            Measurand::EnergyActiveImportRegister,
            UnitOfMeasure::Wh,
        ),
        sampled(
            format!("{:.1}", sample.power_w),
            Measurand::PowerActiveImport,
            UnitOfMeasure::W,
        ),
        sampled(format!("{:.1}", sample.voltage_v), Measurand::Voltage, UnitOfMeasure::V),
        sampled(format!("{:.2}", sample.current_a), Measurand::CurrentImport, UnitOfMeasure::A),
    ]
}

/// A missing `idTagInfo` means the CSMS had nothing against the tag.
fn id_tag_accepted(info: Option<&IdTagInfo>) -> bool {
    info.map_or(true, |i| matches!(i.status, AuthorizationStatus::Accepted))
}

fn boot_outcome(response: BootNotificationResponse) -> BootOutcome {
    let status = match response.status {
        RegistrationStatus::Accepted => BootStatus::Accepted,
        RegistrationStatus::Pending => BootStatus::Pending,
        RegistrationStatus::Rejected => BootStatus::Rejected,
    };
    BootOutcome {
        status,
        interval: u64::try_from(response.interval).ok(),
        current_time: Some(response.current_time),
    }
}

#[async_trait]
impl ProtocolHandler for OcppHandlerV16 {
    fn version(&self) -> OcppVersion {
        OcppVersion::V16
    }

    fn core(&self) -> &HandlerCore {
        &self.core
    }

    async fn boot(&self) -> Result<BootOutcome, OcppError> {
        let config = &self.core.ctx.config;
        let request = BootNotificationRequest {
            charge_box_serial_number: None,
            charge_point_model: config.model.clone(),
            charge_point_serial_number: config.serial_number.clone(),
            charge_point_vendor: config.vendor.clone(),
            firmware_version: config.firmware_version.clone(),
            iccid: None,
            imsi: None,
            meter_serial_number: None,
            meter_type: None,
        };

        let response: BootNotificationResponse =
            exchange(self, "BootNotification", &request).await?;
        let outcome = boot_outcome(response);

        if outcome.status == BootStatus::Accepted {
            if let Some(interval) = outcome.interval.filter(|i| *i > 0) {
                self.configuration
                    .lock()
                    .await
                    .set(&KEY_HEARTBEAT_INTERVAL.to_string(), &interval.to_string());
            }
        }
        self.core.record_boot(&outcome).await;
        Ok(outcome)
    }

    async fn handle_inbound_call(
        &self,
        action: &str,
        payload: Value,
    ) -> Result<InboundReply, InboundError> {
        info!(station_id = %self.station_id(), action, "Received Call");
        action_matcher(self, action, payload).await
    }

    async fn send_status_notification(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
    ) -> Result<(), OcppError> {
        let error_code = self.core.error_code(connector_id).await;
        let request = StatusNotificationRequest {
            connector_id,
            error_code: wire_enum("StatusNotification", &error_code)
                .unwrap_or(ChargePointErrorCode::OtherError),
            info: None,
            status: charge_point_status(status),
            timestamp: Some(Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        };
        let _: StatusNotificationResponse =
            exchange(self, "StatusNotification", &request).await?;
        Ok(())
    }

    async fn authorize(&self, id_tag: &str) -> Result<bool, OcppError> {
        let request = AuthorizeRequest {
            id_tag: id_tag.to_string(),
        };
        let response: AuthorizeResponse = exchange(self, "Authorize", &request).await?;
        Ok(id_tag_accepted(Some(&response.id_tag_info)))
    }

    async fn report_transaction_started(&self, tx: &Transaction) -> Result<StartAck, OcppError> {
        let request = StartTransactionRequest {
            connector_id: tx.connector_id,
            id_tag: tx.id_tag.clone(),
            meter_start: meter_reading(tx.meter_start),
            reservation_id: None,
            timestamp: tx.start_time,
        };
        let response: StartTransactionResponse =
            exchange(self, "StartTransaction", &request).await?;

        Ok(StartAck {
            transaction_id: Some(response.transaction_id),
            authorized: id_tag_accepted(Some(&response.id_tag_info)),
        })
    }

    async fn report_transaction_stopped(&self, tx: &Transaction) -> Result<(), OcppError> {
        let reason = tx.stop_reason.unwrap_or(StopReason::Local);
        let request = StopTransactionRequest {
            id_tag: Some(tx.id_tag.clone()),
            meter_stop: meter_reading(tx.meter_stop.unwrap_or(tx.meter_now)),
            timestamp: tx.stop_time.unwrap_or_else(Utc::now),
            transaction_id: tx.transaction_id,
            reason: Some(wire_enum("StopTransaction", reason.as_str())?),
            transaction_data: None,
        };
        let _: StopTransactionResponse = exchange(self, "StopTransaction", &request).await?;
        Ok(())
    }

    async fn report_meter_values(
        &self,
        tx: &Transaction,
        sample: &MeterSample,
    ) -> Result<(), OcppError> {
        let request = MeterValuesRequest {
            connector_id: tx.connector_id,
            transaction_id: Some(tx.transaction_id),
            meter_value: vec![MeterValue {
                timestamp: sample.timestamp,
                sampled_value: sampled_values(sample, ReadingContext::SamplePeriodic),
            }],
        };
        let _: MeterValuesResponse = exchange(self, "MeterValues", &request).await?;
        Ok(())
    }

    async fn meter_sample_interval(&self) -> Duration {
        self.config_u64(KEY_METER_SAMPLE_INTERVAL)
            .await
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.core.ctx.settings.meter_sample_interval)
    }

    async fn authorize_remote_start(&self) -> bool {
        self.config_bool(KEY_AUTHORIZE_REMOTE).await.unwrap_or(false)
    }

    async fn stop_on_invalid_id(&self) -> bool {
        self.config_bool(KEY_STOP_ON_INVALID_ID).await.unwrap_or(true)
    }
}
