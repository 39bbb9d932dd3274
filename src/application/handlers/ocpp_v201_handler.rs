//! OCPP 2.0.1 protocol handler
//!
//! Connector `n` of the simulator is EVSE `n` with a single connector `1`.
//! Transactions are reported through TransactionEvent; the transaction id
//! is the station-local id rendered as a string.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_ocpp::v2_0_1::datatypes::charging_station_type::ChargingStationType;
use rust_ocpp::v2_0_1::datatypes::evse_type::EVSEType;
use rust_ocpp::v2_0_1::datatypes::id_token_info_type::IdTokenInfoType;
use rust_ocpp::v2_0_1::datatypes::id_token_type::IdTokenType;
use rust_ocpp::v2_0_1::datatypes::meter_value_type::MeterValueType;
use rust_ocpp::v2_0_1::datatypes::sampled_value_type::SampledValueType;
use rust_ocpp::v2_0_1::datatypes::transaction_type::TransactionType;
use rust_ocpp::v2_0_1::datatypes::unit_of_measure_type::UnitOfMeasureType;
use rust_ocpp::v2_0_1::enumerations::authorization_status_enum_type::AuthorizationStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::boot_reason_enum_type::BootReasonEnumType;
use rust_ocpp::v2_0_1::enumerations::charging_state_enum_type::ChargingStateEnumType;
use rust_ocpp::v2_0_1::enumerations::id_token_enum_type::IdTokenEnumType;
use rust_ocpp::v2_0_1::enumerations::measurand_enum_type::MeasurandEnumType;
use rust_ocpp::v2_0_1::enumerations::reading_context_enum_type::ReadingContextEnumType;
use rust_ocpp::v2_0_1::enumerations::registration_status_enum_type::RegistrationStatusEnumType;
use rust_ocpp::v2_0_1::enumerations::transaction_event_enum_type::TransactionEventEnumType;
use rust_ocpp::v2_0_1::enumerations::trigger_reason_enum_type::TriggerReasonEnumType;
use rust_ocpp::v2_0_1::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v2_0_1::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v2_0_1::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v2_0_1::messages::transaction_event::{
    TransactionEventRequest, TransactionEventResponse,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use super::ocpp_v201::action_matcher;
use super::{
    exchange, wire_enum, HandlerCore, InboundError, InboundReply, ProtocolHandler, StartAck,
};
use crate::application::station::StationContext;
use crate::domain::configuration::{ConfigStore, Mutability, ValueKind, VariableKey};
use crate::domain::{
    BootOutcome, BootStatus, ConnectorStatus, MeterSample, OcppVersion, StopReason, Transaction,
};
use crate::shared::OcppError;

pub(crate) const OCPP_COMM_CTRLR: &str = "OCPPCommCtrlr";
pub(crate) const SAMPLED_DATA_CTRLR: &str = "SampledDataCtrlr";
pub(crate) const AUTH_CTRLR: &str = "AuthCtrlr";
pub(crate) const TX_CTRLR: &str = "TxCtrlr";

pub(crate) fn heartbeat_interval_key() -> VariableKey {
    VariableKey::new(OCPP_COMM_CTRLR, "HeartbeatInterval")
}

fn tx_updated_interval_key() -> VariableKey {
    VariableKey::new(SAMPLED_DATA_CTRLR, "TxUpdatedInterval")
}

fn authorize_remote_start_key() -> VariableKey {
    VariableKey::new(AUTH_CTRLR, "AuthorizeRemoteStart")
}

fn stop_on_invalid_id_key() -> VariableKey {
    VariableKey::new(TX_CTRLR, "StopTxOnInvalidId")
}

/// Handler for OCPP 2.0.1 stations
pub struct OcppHandlerV201 {
    core: HandlerCore,
    pub(crate) variables: Mutex<ConfigStore<VariableKey>>,
}

impl OcppHandlerV201 {
    pub fn new(ctx: Arc<StationContext>) -> Self {
        let variables = Mutex::new(default_variables(&ctx));
        Self {
            core: HandlerCore::new(ctx),
            variables,
        }
    }

    async fn variable_u64(&self, key: &VariableKey) -> Option<u64> {
        self.variables.lock().await.get(key).and_then(|e| e.as_u64())
    }

    async fn variable_bool(&self, key: &VariableKey) -> Option<bool> {
        self.variables.lock().await.get(key).and_then(|e| e.as_bool())
    }

    async fn transaction_event(
        &self,
        request: TransactionEventRequest,
    ) -> Result<TransactionEventResponse, OcppError> {
        exchange(self, "TransactionEvent", &request).await
    }
}

fn default_variables(ctx: &StationContext) -> ConfigStore<VariableKey> {
    use Mutability::{ReadOnly, ReadWrite};
    use ValueKind::{Boolean, Integer, Text};

    let heartbeat = ctx
        .config
        .heartbeat_interval
        .unwrap_or_else(|| ctx.settings.default_heartbeat_interval.as_secs());

    let mut store = ConfigStore::new();
    store
        .insert(heartbeat_interval_key(), heartbeat.to_string(), ReadWrite, Integer)
        .insert(
            VariableKey::new(OCPP_COMM_CTRLR, "NetworkConfigurationPriority"),
            "0",
            ReadOnly,
            Text,
        )
        .insert(
            tx_updated_interval_key(),
            ctx.settings.meter_sample_interval.as_secs().to_string(),
            ReadWrite,
            Integer,
        )
        .insert(
            VariableKey::new(SAMPLED_DATA_CTRLR, "TxUpdatedMeasurands"),
            "Energy.Active.Import.Register,Power.Active.Import",
            ReadWrite,
            Text,
        )
        .insert(VariableKey::new(AUTH_CTRLR, "Enabled"), "true", ReadWrite, Boolean)
        .insert(authorize_remote_start_key(), "false", ReadWrite, Boolean)
        .insert(stop_on_invalid_id_key(), "true", ReadWrite, Boolean)
        .insert(
            VariableKey::new(TX_CTRLR, "EVConnectionTimeOut"),
            ctx.settings.connect_timeout.as_secs().to_string(),
            ReadWrite,
            Integer,
        )
        .insert(
            VariableKey::new("SmartChargingCtrlr", "ProfileStackLevel"),
            crate::domain::charging_profile::model::DEFAULT_MAX_STACK_LEVEL.to_string(),
            ReadOnly,
            Integer,
        )
        .insert(
            VariableKey::new("ChargingStation", "Model"),
            ctx.config.model.clone(),
            ReadOnly,
            Text,
        )
        .insert(
            VariableKey::new("ChargingStation", "VendorName"),
            ctx.config.vendor.clone(),
            ReadOnly,
            Text,
        )
        .insert(
            VariableKey::new("EVSE", "Count"),
            ctx.config.connector_count.to_string(),
            ReadOnly,
            Integer,
        );
    store
}

/// OCPP 2.0.1 `triggerReason` for a stopped transaction.
fn stop_trigger_reason(reason: Option<StopReason>) -> &'static str {
    match reason {
        Some(StopReason::Remote) => "RemoteStop",
        Some(StopReason::DeAuthorized) => "Deauthorized",
        Some(StopReason::HardReset) | Some(StopReason::SoftReset) => "ResetCommand",
        Some(StopReason::UnlockCommand) => "UnlockCommand",
        Some(StopReason::EVDisconnected) => "EVCommunicationLost",
        _ => "StopAuthorized",
    }
}

fn id_token(id_tag: &str) -> IdTokenType {
    IdTokenType {
        id_token: id_tag.to_string(),
        kind: IdTokenEnumType::ISO14443,
        additional_info: None,
    }
}

fn evse(connector_id: u32) -> Option<EVSEType> {
    Some(EVSEType {
        id: evse_id(connector_id),
        connector_id: Some(1),
    })
}

fn evse_id(connector_id: u32) -> i32 {
    i32::try_from(connector_id).unwrap_or(i32::MAX)
}

fn sampled_value(
    value: Decimal,
    context: ReadingContextEnumType,
    measurand: MeasurandEnumType,
    unit: &str,
) -> SampledValueType {
    SampledValueType {
        value,
        context: Some(context),
        measurand: Some(measurand),
        phase: None,
        location: None,
        signed_meter_value: None,
        unit_of_measure: Some(UnitOfMeasureType {
            unit: Some(unit.to_string()),
            multiplier: None,
        }),
    }
}

fn decimal(value: f64, places: u32) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(places)
}

fn energy_value(
    timestamp: DateTime<Utc>,
    energy_wh: u64,
    context: ReadingContextEnumType,
) -> Option<Vec<MeterValueType>> {
    Some(vec![MeterValueType {
        timestamp,
        sampled_value: vec![sampled_value(
            Decimal::from(energy_wh),
            context,
            MeasurandEnumType::EnergyActiveImportRegister,
            "Wh",
        )],
    }])
}

pub(crate) fn sample_meter_value(
    sample: &MeterSample,
    context: ReadingContextEnumType,
) -> Vec<MeterValueType> {
    let sampled = |value: Decimal, measurand: MeasurandEnumType, unit: &str| {
        sampled_value(value, context.clone(), measurand, unit)
    };
    vec![MeterValueType {
        timestamp: sample.timestamp,
        sampled_value: vec![
            sampled(
                Decimal::from(sample.energy_wh),
                MeasurandEnumType::EnergyActiveImportRegister,
                "Wh",
            ),
            sampled(decimal(sample.power_w, 1), MeasurandEnumType::PowerActiveImport, "W"),
            sampled(decimal(sample.voltage_v, 1), MeasurandEnumType::Voltage, "V"),
            sampled(decimal(sample.current_a, 2), MeasurandEnumType::CurrentImport, "A"),
        ],
    }]
}

/// A missing `idTokenInfo` means the CSMS had nothing against the token.
fn id_token_accepted(info: Option<&IdTokenInfoType>) -> bool {
    info.map_or(true, |i| matches!(i.status, AuthorizationStatusEnumType::Accepted))
}

fn boot_outcome(response: BootNotificationResponse) -> BootOutcome {
    let status = match response.status {
        RegistrationStatusEnumType::Accepted => BootStatus::Accepted,
        RegistrationStatusEnumType::Pending => BootStatus::Pending,
        RegistrationStatusEnumType::Rejected => BootStatus::Rejected,
    };
    BootOutcome {
        status,
        interval: u64::try_from(response.interval).ok(),
        current_time: Some(response.current_time),
    }
}

#[async_trait]
impl ProtocolHandler for OcppHandlerV201 {
    fn version(&self) -> OcppVersion {
        OcppVersion::V201
    }

    fn core(&self) -> &HandlerCore {
        &self.core
    }

    async fn boot(&self) -> Result<BootOutcome, OcppError> {
        let config = &self.core.ctx.config;
        let request = BootNotificationRequest {
            charging_station: ChargingStationType {
                serial_number: config.serial_number.clone(),
                model: config.model.clone(),
                modem: None,
                vendor_name: config.vendor.clone(),
                firmware_version: config.firmware_version.clone(),
            },
            reason: BootReasonEnumType::PowerUp,
        };

        let response: BootNotificationResponse =
            exchange(self, "BootNotification", &request).await?;
        let outcome = boot_outcome(response);

        if outcome.status == BootStatus::Accepted {
            if let Some(interval) = outcome.interval.filter(|i| *i > 0) {
                self.variables
                    .lock()
                    .await
                    .set(&heartbeat_interval_key(), &interval.to_string());
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
        info!(station_id = %self.station_id(), action, "V201: Received Call");
        action_matcher(self, action, payload).await
    }

    async fn send_status_notification(
        &self,
        connector_id: u32,
        status: ConnectorStatus,
    ) -> Result<(), OcppError> {
        let request = StatusNotificationRequest {
            timestamp: Utc::now(),
            connector_status: wire_enum("StatusNotification", status.as_v201())?,
            evse_id: evse_id(connector_id),
            connector_id: 1,
        };
        let _: StatusNotificationResponse =
            exchange(self, "StatusNotification", &request).await?;
        Ok(())
    }

    async fn authorize(&self, id_tag: &str) -> Result<bool, OcppError> {
        let request = AuthorizeRequest {
            id_token: id_token(id_tag),
            certificate: None,
            iso_15118_certificate_hash_data: None,
        };
        let response: AuthorizeResponse = exchange(self, "Authorize", &request).await?;
        Ok(id_token_accepted(Some(&response.id_token_info)))
    }

    async fn report_transaction_started(&self, tx: &Transaction) -> Result<StartAck, OcppError> {
        let trigger_reason = if tx.remote_start_id.is_some() {
            TriggerReasonEnumType::RemoteStart
        } else {
            TriggerReasonEnumType::Authorized
        };

        let request = TransactionEventRequest {
            event_type: TransactionEventEnumType::Started,
            timestamp: tx.start_time,
            trigger_reason,
            seq_no: seq_no(self.core.next_seq_no(tx).await),
            offline: None,
            number_of_phases_used: None,
            cable_max_current: None,
            reservation_id: None,
            transaction_info: TransactionType {
                transaction_id: tx.transaction_id.to_string(),
                charging_state: Some(ChargingStateEnumType::Charging),
                time_spent_charging: None,
                stopped_reason: None,
                remote_start_id: tx.remote_start_id,
            },
            id_token: Some(id_token(&tx.id_tag)),
            evse: evse(tx.connector_id),
            meter_value: energy_value(
                tx.start_time,
                tx.meter_start,
                ReadingContextEnumType::TransactionBegin,
            ),
        };
        let response = self.transaction_event(request).await?;
        Ok(StartAck {
            transaction_id: None,
            authorized: id_token_accepted(response.id_token_info.as_ref()),
        })
    }

    async fn report_transaction_stopped(&self, tx: &Transaction) -> Result<(), OcppError> {
        let timestamp = tx.stop_time.unwrap_or_else(Utc::now);
        let stopped_reason = tx.stop_reason.map(|r| r.as_v201()).unwrap_or("Local");

        let request = TransactionEventRequest {
            event_type: TransactionEventEnumType::Ended,
            timestamp,
            trigger_reason: wire_enum("TransactionEvent", stop_trigger_reason(tx.stop_reason))?,
            seq_no: seq_no(self.core.next_seq_no(tx).await),
            offline: None,
            number_of_phases_used: None,
            cable_max_current: None,
            reservation_id: None,
            transaction_info: TransactionType {
                transaction_id: tx.transaction_id.to_string(),
                charging_state: Some(ChargingStateEnumType::Idle),
                time_spent_charging: None,
                stopped_reason: Some(wire_enum("TransactionEvent", stopped_reason)?),
                remote_start_id: None,
            },
            id_token: Some(id_token(&tx.id_tag)),
            evse: evse(tx.connector_id),
            meter_value: energy_value(
                timestamp,
                tx.meter_stop.unwrap_or(tx.meter_now),
                ReadingContextEnumType::TransactionEnd,
            ),
        };
        self.transaction_event(request).await?;
        Ok(())
    }

    async fn report_meter_values(
        &self,
        tx: &Transaction,
        sample: &MeterSample,
    ) -> Result<(), OcppError> {
        let request = TransactionEventRequest {
            event_type: TransactionEventEnumType::Updated,
            timestamp: sample.timestamp,
            trigger_reason: TriggerReasonEnumType::MeterValuePeriodic,
            seq_no: seq_no(self.core.next_seq_no(tx).await),
            offline: None,
            number_of_phases_used: None,
            cable_max_current: None,
            reservation_id: None,
            transaction_info: TransactionType {
                transaction_id: tx.transaction_id.to_string(),
                charging_state: Some(ChargingStateEnumType::Charging),
                time_spent_charging: None,
                stopped_reason: None,
                remote_start_id: None,
            },
            id_token: None,
            evse: evse(tx.connector_id),
            meter_value: Some(sample_meter_value(sample, ReadingContextEnumType::SamplePeriodic)),
        };
        self.transaction_event(request).await?;
        Ok(())
    }

    async fn meter_sample_interval(&self) -> Duration {
        self.variable_u64(&tx_updated_interval_key())
            .await
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.core.ctx.settings.meter_sample_interval)
    }

    async fn authorize_remote_start(&self) -> bool {
        self.variable_bool(&authorize_remote_start_key())
            .await
            .unwrap_or(false)
    }

    async fn stop_on_invalid_id(&self) -> bool {
        self.variable_bool(&stop_on_invalid_id_key())
            .await
            .unwrap_or(true)
    }
}

fn seq_no(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::handlers::decode_response;
    use crate::application::session::OutboundMessage;
    use crate::config::SimulatorSettings;
    use crate::domain::StationConfig;
    use crate::shared::OcppFrame;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn handler() -> OcppHandlerV201 {
        let config = StationConfig::new("CS001", OcppVersion::V201, "ws://localhost:9000/ocpp")
            .with_connectors(2);
        let (ctx, _rx) = StationContext::new(config, SimulatorSettings::default());
        OcppHandlerV201::new(ctx)
    }

    async fn answer_next_call(
        handler: &OcppHandlerV201,
        rx: &mut mpsc::UnboundedReceiver<OutboundMessage>,
        payload: Value,
    ) -> OcppFrame {
        let OutboundMessage::Text(text) = rx.recv().await.unwrap() else {
            panic!("expected text frame");
        };
        let call = OcppFrame::parse(&text).unwrap();
        handler
            .core()
            .ctx
            .session
            .route_response(OcppFrame::result(call.message_id(), payload));
        call
    }

    #[tokio::test]
    async fn default_variables() {
        let h = handler();
        assert_eq!(h.variable_u64(&heartbeat_interval_key()).await, Some(60));
        assert_eq!(h.variable_u64(&VariableKey::new("EVSE", "Count")).await, Some(2));
        assert!(!h.authorize_remote_start().await);
        assert!(h.stop_on_invalid_id().await);
    }

    #[test]
    fn stop_reasons_map_to_trigger_reasons() {
        assert_eq!(stop_trigger_reason(Some(StopReason::Remote)), "RemoteStop");
        assert_eq!(stop_trigger_reason(Some(StopReason::HardReset)), "ResetCommand");
        assert_eq!(stop_trigger_reason(Some(StopReason::Local)), "StopAuthorized");
        assert_eq!(stop_trigger_reason(None), "StopAuthorized");

        for reason in [
            StopReason::Remote,
            StopReason::DeAuthorized,
            StopReason::HardReset,
            StopReason::UnlockCommand,
            StopReason::EVDisconnected,
            StopReason::Local,
        ] {
            assert!(
                wire_enum::<TriggerReasonEnumType>("TransactionEvent", stop_trigger_reason(Some(reason)))
                    .is_ok()
            );
        }
    }

    #[test]
    fn meter_value_shape() {
        let sample = MeterSample {
            timestamp: Utc::now(),
            energy_wh: 2000,
            power_w: 11000.0,
            voltage_v: 230.0,
            current_a: 47.8,
        };
        let mv = serde_json::to_value(sample_meter_value(
            &sample,
            ReadingContextEnumType::SamplePeriodic,
        ))
        .unwrap();
        let values = mv[0]["sampledValue"].as_array().unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(values[0]["measurand"], "Energy.Active.Import.Register");
        assert_eq!(values[0]["context"], "Sample.Periodic");
        assert_eq!(values[0]["unitOfMeasure"]["unit"], "Wh");
        assert_eq!(values[3]["unitOfMeasure"]["unit"], "A");
    }

    #[test]
    fn id_token_info_decides_authorization() {
        let empty: TransactionEventResponse = decode_response("TransactionEvent", json!({})).unwrap();
        let invalid: TransactionEventResponse =
            decode_response("TransactionEvent", json!({"idTokenInfo": {"status": "Invalid"}}))
                .unwrap();

        assert!(id_token_accepted(empty.id_token_info.as_ref()));
        assert!(!id_token_accepted(invalid.id_token_info.as_ref()));
    }

    #[tokio::test]
    async fn boot_sends_charging_station_and_reason() {
        let h = handler();
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.core().ctx.session.attach(tx).await;

        let (outcome, call) = tokio::join!(
            h.boot(),
            answer_next_call(
                &h,
                &mut rx,
                json!({"status": "Accepted", "interval": 30, "currentTime": "2024-01-01T00:00:00Z"})
            )
        );
        assert_eq!(outcome.unwrap().interval, Some(30));
        assert_eq!(h.variable_u64(&heartbeat_interval_key()).await, Some(30));

        let OcppFrame::Call { payload, .. } = call else {
            panic!("expected CALL");
        };
        assert_eq!(payload["reason"], "PowerUp");
        assert!(payload["chargingStation"]["vendorName"].is_string());
    }

    #[tokio::test]
    async fn ended_event_carries_stopped_reason() {
        let h = handler();
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.core().ctx.session.attach(tx).await;

        let mut transaction = Transaction::new(5, 2, "TAG1", 100);
        transaction.stop_time = Some(Utc::now());
        transaction.stop_reason = Some(StopReason::HardReset);
        transaction.meter_stop = Some(900);

        let (result, call) = tokio::join!(
            h.report_transaction_stopped(&transaction),
            answer_next_call(&h, &mut rx, json!({}))
        );
        result.unwrap();

        let OcppFrame::Call { payload, .. } = call else {
            panic!("expected CALL");
        };
        assert_eq!(payload["eventType"], "Ended");
        assert_eq!(payload["triggerReason"], "ResetCommand");
        assert_eq!(payload["transactionInfo"]["transactionId"], "5");
        assert_eq!(payload["transactionInfo"]["stoppedReason"], "ImmediateReset");
        assert_eq!(payload["evse"]["id"], 2);
    }

    #[tokio::test]
    async fn malformed_authorize_answer_is_rejected() {
        let h = handler();
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.core().ctx.session.attach(tx).await;

        let (result, _) = tokio::join!(
            h.authorize("TAG1"),
            answer_next_call(&h, &mut rx, json!({"idTokenInfo": {"status": 5}}))
        );
        assert!(matches!(result, Err(OcppError::InvalidPayload { .. })));
    }
}
