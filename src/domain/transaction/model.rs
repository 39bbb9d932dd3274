//! Transaction domain entity

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::OcppError;

/// Why a transaction ended (OCPP 1.6 `Reason` set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    DeAuthorized,
    EmergencyStop,
    EVDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeAuthorized => "DeAuthorized",
            Self::EmergencyStop => "EmergencyStop",
            Self::EVDisconnected => "EVDisconnected",
            Self::HardReset => "HardReset",
            Self::Local => "Local",
            Self::Other => "Other",
            Self::PowerLoss => "PowerLoss",
            Self::Reboot => "Reboot",
            Self::Remote => "Remote",
            Self::SoftReset => "SoftReset",
            Self::UnlockCommand => "UnlockCommand",
        }
    }

    /// Closest `ReasonEnumType` value in OCPP 2.0.1.
    pub fn as_v201(&self) -> &'static str {
        match self {
            Self::HardReset => "ImmediateReset",
            Self::SoftReset => "Reboot",
            Self::UnlockCommand => "Other",
            other => other.as_str(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "DeAuthorized" => Self::DeAuthorized,
            "EmergencyStop" => Self::EmergencyStop,
            "EVDisconnected" => Self::EVDisconnected,
            "HardReset" | "ImmediateReset" => Self::HardReset,
            "Local" => Self::Local,
            "Other" => Self::Other,
            "PowerLoss" => Self::PowerLoss,
            "Reboot" => Self::Reboot,
            "Remote" => Self::Remote,
            "SoftReset" => Self::SoftReset,
            "UnlockCommand" => Self::UnlockCommand,
            _ => return None,
        })
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One meter sample taken while a transaction runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterSample {
    pub timestamp: DateTime<Utc>,
    /// Energy register (Wh)
    pub energy_wh: u64,
    /// Instantaneous power (W)
    pub power_w: f64,
    pub voltage_v: f64,
    pub current_a: f64,
}

/// Charging transaction on a single connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Station-local id, replaced by the CSMS id when one is assigned
    pub transaction_id: i32,
    pub connector_id: u32,
    /// ID tag that started the transaction
    pub id_tag: String,
    /// Meter value at start (Wh)
    pub meter_start: u64,
    /// Meter value at stop (Wh)
    pub meter_stop: Option<u64>,
    /// Latest sampled register value (Wh)
    pub meter_now: u64,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    pub stop_reason: Option<StopReason>,
    /// `remoteStartId` of an OCPP 2.0.1 RequestStartTransaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_start_id: Option<i32>,
    /// Next `seqNo` for OCPP 2.0.1 TransactionEvent messages
    #[serde(skip)]
    pub seq_no: u32,
}

impl Transaction {
    pub fn new(
        transaction_id: i32,
        connector_id: u32,
        id_tag: impl Into<String>,
        meter_start: u64,
    ) -> Self {
        Self {
            transaction_id,
            connector_id,
            id_tag: id_tag.into(),
            meter_start,
            meter_stop: None,
            meter_now: meter_start,
            start_time: Utc::now(),
            stop_time: None,
            stop_reason: None,
            remote_start_id: None,
            seq_no: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop_time.is_none()
    }

    /// Record the latest register value. Closed transactions are immutable.
    pub fn record_meter(&mut self, energy_wh: u64) -> Result<(), OcppError> {
        if !self.is_active() {
            return Err(OcppError::InvalidState(format!(
                "transaction {} is closed",
                self.transaction_id
            )));
        }
        self.meter_now = energy_wh.max(self.meter_now);
        Ok(())
    }

    /// Close the transaction at the current register value.
    pub fn close(&mut self, reason: StopReason) -> Result<(), OcppError> {
        if !self.is_active() {
            return Err(OcppError::InvalidState(format!(
                "transaction {} is already closed",
                self.transaction_id
            )));
        }
        self.meter_stop = Some(self.meter_now);
        self.stop_time = Some(Utc::now());
        self.stop_reason = Some(reason);
        Ok(())
    }

    /// Energy delivered so far (Wh)
    pub fn energy_consumed(&self) -> u64 {
        self.meter_stop.unwrap_or(self.meter_now) - self.meter_start
    }

    /// Take the next OCPP 2.0.1 sequence number.
    pub fn next_seq_no(&mut self) -> u32 {
        let seq = self.seq_no;
        self.seq_no += 1;
        seq
    }
}

// ── Tests ──────────────────────────────────────────────────────
