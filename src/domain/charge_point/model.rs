//! Connector state machine
//!
//! The simulated charge point owns a fixed set of connectors. Every guard in
//! this module is evaluated on local state only, so a rejected operation
//! never reaches the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::transaction::{StopReason, Transaction};
use crate::shared::OcppError;

/// Connector status (OCPP 1.6 `ChargePointStatus` values)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectorStatus {
    #[default]
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Preparing => "Preparing",
            Self::Charging => "Charging",
            Self::SuspendedEV => "SuspendedEV",
            Self::SuspendedEVSE => "SuspendedEVSE",
            Self::Finishing => "Finishing",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::Faulted => "Faulted",
        }
    }

    /// OCPP 2.0.1 `ConnectorStatusEnumType` equivalent.
    pub fn as_v201(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Preparing
            | Self::Charging
            | Self::SuspendedEV
            | Self::SuspendedEVSE
            | Self::Finishing => "Occupied",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::Faulted => "Faulted",
        }
    }

    /// Statuses in which a transaction may be running.
    pub fn holds_transaction(&self) -> bool {
        matches!(self, Self::Charging | Self::SuspendedEV | Self::SuspendedEVSE)
    }

    /// Statuses from which a new transaction may start.
    pub fn accepts_start(&self) -> bool {
        matches!(self, Self::Available | Self::Preparing)
    }

    /// Whether `self -> next` is an allowed status change.
    pub fn can_transition_to(&self, next: ConnectorStatus) -> bool {
        use ConnectorStatus::*;

        if *self == next {
            return false;
        }

        match (*self, next) {
            (_, Faulted) | (Faulted, _) => true,
            (Available, Finishing) => false,
            (Available, _) => true,
            (Preparing, Reserved) => false,
            (Preparing, _) => true,
            (Charging | SuspendedEV | SuspendedEVSE, Preparing | Reserved) => false,
            (Charging | SuspendedEV | SuspendedEVSE, _) => true,
            (Finishing, Available | Preparing | Unavailable) => true,
            (Finishing, _) => false,
            (Reserved, Available | Preparing | Unavailable) => true,
            (Reserved, _) => false,
            (Unavailable, Finishing | Reserved) => false,
            (Unavailable, _) => true,
        }
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorStatus {
    type Err = OcppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Available" => Self::Available,
            "Preparing" => Self::Preparing,
            "Charging" => Self::Charging,
            "SuspendedEV" => Self::SuspendedEV,
            "SuspendedEVSE" => Self::SuspendedEVSE,
            "Finishing" => Self::Finishing,
            "Reserved" => Self::Reserved,
            "Unavailable" => Self::Unavailable,
            "Faulted" => Self::Faulted,
            other => {
                return Err(OcppError::InvalidState(format!(
                    "unknown connector status '{other}'"
                )))
            }
        })
    }
}

/// Connector on a charge point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub id: u32,
    pub status: ConnectorStatus,
    pub error_code: String,
    pub active_transaction: Option<Transaction>,
    /// Most recently closed transaction
    pub last_transaction: Option<Transaction>,
    /// Energy register of this outlet (Wh)
    pub meter_wh: u64,
    /// Status to apply once the running transaction ends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_status: Option<ConnectorStatus>,
}

impl Connector {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            status: ConnectorStatus::default(),
            error_code: "NoError".to_string(),
            active_transaction: None,
            last_transaction: None,
            meter_wh: 0,
            scheduled_status: None,
        }
    }

    /// Apply a status change, enforcing the transition table and the
    /// transaction invariant. Returns the previous status.
    pub fn set_status(&mut self, next: ConnectorStatus) -> Result<ConnectorStatus, OcppError> {
        if self.status == next {
            return Ok(next);
        }
        if !self.status.can_transition_to(next) {
            return Err(OcppError::InvalidState(format!(
                "connector {} cannot go from {} to {}",
                self.id, self.status, next
            )));
        }
        if self.active_transaction.is_some() && !next.holds_transaction() {
            return Err(OcppError::InvalidState(format!(
                "connector {} has an active transaction, stop it before switching to {}",
                self.id, next
            )));
        }

        let previous = self.status;
        self.status = next;
        self.error_code = if next == ConnectorStatus::Faulted {
            "OtherError".to_string()
        } else {
            "NoError".to_string()
        };
        Ok(previous)
    }

    fn begin(&mut self, tx: Transaction) -> Result<(), OcppError> {
        if !self.status.accepts_start() {
            return Err(OcppError::InvalidState(format!(
                "connector {} is {}, a transaction can only start on Available or Preparing",
                self.id, self.status
            )));
        }
        if self.active_transaction.is_some() {
            return Err(OcppError::InvalidState(format!(
                "connector {} already has an active transaction",
                self.id
            )));
        }
        self.active_transaction = Some(tx);
        self.status = ConnectorStatus::Charging;
        Ok(())
    }

    fn end(&mut self, reason: StopReason) -> Result<Transaction, OcppError> {
        let mut tx = self
            .active_transaction
            .take()
            .ok_or(OcppError::NoActiveTransaction(self.id))?;
        tx.close(reason)?;
        self.meter_wh = tx.meter_now;
        self.status = self
            .scheduled_status
            .take()
            .unwrap_or(ConnectorStatus::Available);
        self.last_transaction = Some(tx.clone());
        Ok(tx)
    }
}

/// Result of a ChangeAvailability request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityChange {
    /// At least one connector defers the change until its transaction ends.
    pub scheduled: bool,
    /// Connectors whose status changed right away.
    pub changed: Vec<(u32, ConnectorStatus)>,
}

/// The connector set of one simulated charge point.
#[derive(Debug, Clone)]
pub struct ChargePoint {
    connectors: Vec<Connector>,
    next_transaction_id: i32,
}

impl ChargePoint {
    pub fn new(connector_count: u32) -> Self {
        Self {
            connectors: (1..=connector_count).map(Connector::new).collect(),
            next_transaction_id: 1,
        }
    }

    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn connector(&self, id: u32) -> Result<&Connector, OcppError> {
        self.connectors
            .iter()
            .find(|c| c.id == id)
            .ok_or(OcppError::UnknownConnector(id))
    }

    fn connector_mut(&mut self, id: u32) -> Result<&mut Connector, OcppError> {
        self.connectors
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(OcppError::UnknownConnector(id))
    }

    pub fn set_status(
        &mut self,
        connector_id: u32,
        status: ConnectorStatus,
    ) -> Result<ConnectorStatus, OcppError> {
        self.connector_mut(connector_id)?.set_status(status)
    }

    /// Whether a transaction could start on `connector_id` right now.
    pub fn can_start(&self, connector_id: u32) -> bool {
        self.connector(connector_id)
            .map(|c| c.status.accepts_start() && c.active_transaction.is_none())
            .unwrap_or(false)
    }

    pub fn first_available(&self) -> Option<u32> {
        self.connectors
            .iter()
            .find(|c| c.status == ConnectorStatus::Available && c.active_transaction.is_none())
            .map(|c| c.id)
    }

    /// Create a transaction and move the connector to `Charging`.
    pub fn begin_transaction(
        &mut self,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<Transaction, OcppError> {
        let transaction_id = self.next_transaction_id;
        let connector = self.connector_mut(connector_id)?;
        let tx = Transaction::new(transaction_id, connector_id, id_tag, connector.meter_wh);
        connector.begin(tx.clone())?;
        self.next_transaction_id += 1;
        Ok(tx)
    }

    /// Close the active transaction and free the connector.
    pub fn end_transaction(
        &mut self,
        connector_id: u32,
        reason: StopReason,
    ) -> Result<Transaction, OcppError> {
        self.connector_mut(connector_id)?.end(reason)
    }

    pub fn active_transaction(&self, connector_id: u32) -> Option<&Transaction> {
        self.connector(connector_id)
            .ok()
            .and_then(|c| c.active_transaction.as_ref())
    }

    pub fn transaction_mut(&mut self, connector_id: u32) -> Result<&mut Transaction, OcppError> {
        self.connector_mut(connector_id)?
            .active_transaction
            .as_mut()
            .ok_or(OcppError::NoActiveTransaction(connector_id))
    }

    /// Connector running the transaction with the given id.
    pub fn find_transaction(&self, transaction_id: i32) -> Option<u32> {
        self.connectors
            .iter()
            .find(|c| {
                c.active_transaction
                    .as_ref()
                    .is_some_and(|tx| tx.transaction_id == transaction_id)
            })
            .map(|c| c.id)
    }

    pub fn active_connectors(&self) -> Vec<u32> {
        self.connectors
            .iter()
            .filter(|c| c.active_transaction.is_some())
            .map(|c| c.id)
            .collect()
    }

    /// Advance the energy register of a charging connector.
    pub fn record_meter(
        &mut self,
        connector_id: u32,
        energy_wh: u64,
    ) -> Result<Transaction, OcppError> {
        let connector = self.connector_mut(connector_id)?;
        let tx = connector
            .active_transaction
            .as_mut()
            .ok_or(OcppError::NoActiveTransaction(connector_id))?;
        tx.record_meter(energy_wh)?;
        connector.meter_wh = tx.meter_now;
        Ok(tx.clone())
    }

    /// Replace the local transaction id with the one the CSMS assigned.
    pub fn assign_transaction_id(
        &mut self,
        connector_id: u32,
        transaction_id: i32,
    ) -> Result<(), OcppError> {
        self.transaction_mut(connector_id)?.transaction_id = transaction_id;
        Ok(())
    }

    /// Switch one connector (or all with `0`) between operative and inoperative.
    pub fn change_availability(
        &mut self,
        connector_id: u32,
        operative: bool,
    ) -> Result<AvailabilityChange, OcppError> {
        let targets: Vec<u32> = if connector_id == 0 {
            self.connectors.iter().map(|c| c.id).collect()
        } else {
            vec![self.connector(connector_id)?.id]
        };

        let desired = if operative {
            ConnectorStatus::Available
        } else {
            ConnectorStatus::Unavailable
        };

        let mut change = AvailabilityChange {
            scheduled: false,
            changed: Vec::new(),
        };

        for id in targets {
            let connector = self.connector_mut(id)?;
            if connector.active_transaction.is_some() {
                connector.scheduled_status = (!operative).then_some(desired);
                change.scheduled |= !operative;
                continue;
            }
            if connector.status == desired {
                continue;
            }
            if connector.set_status(desired).is_ok() {
                change.changed.push((id, desired));
            }
        }

        Ok(change)
    }
}
