//! Work items queued by inbound CSMS requests
//!
//! Inbound handlers answer the CSMS right away and never wait on outbound
//! calls themselves. Anything that needs a CALL of its own (a transaction
//! report, a status notification, a reboot) is queued here and executed by
//! the station worker after the response has been written.

use crate::domain::{ConnectorStatus, StopReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    /// 1.6 `Hard` / 2.0.1 `Immediate`
    Hard,
    /// 1.6 `Soft` / 2.0.1 `OnIdle`
    Soft,
}

impl ResetKind {
    pub fn stop_reason(&self) -> StopReason {
        match self {
            Self::Hard => StopReason::HardReset,
            Self::Soft => StopReason::SoftReset,
        }
    }
}

/// Messages a CSMS can request through TriggerMessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    BootNotification,
    Heartbeat,
    StatusNotification,
    MeterValues,
}

impl TriggerKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BootNotification" => Some(Self::BootNotification),
            "Heartbeat" => Some(Self::Heartbeat),
            "StatusNotification" => Some(Self::StatusNotification),
            "MeterValues" => Some(Self::MeterValues),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StationCommand {
    StartTransaction {
        connector_id: u32,
        id_tag: String,
        remote_start_id: Option<i32>,
    },
    StopTransaction {
        connector_id: u32,
        reason: StopReason,
    },
    /// A connector status was changed locally; notify the CSMS.
    StatusChanged {
        connector_id: u32,
        previous: ConnectorStatus,
        status: ConnectorStatus,
    },
    Reset(ResetKind),
    Trigger {
        message: TriggerKind,
        connector_id: Option<u32>,
    },
}

impl StationCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartTransaction { .. } => "StartTransaction",
            Self::StopTransaction { .. } => "StopTransaction",
            Self::StatusChanged { .. } => "StatusChanged",
            Self::Reset(_) => "Reset",
            Self::Trigger { .. } => "Trigger",
        }
    }
}
