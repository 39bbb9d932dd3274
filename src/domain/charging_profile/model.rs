//! Charging profiles installed on a simulated station

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Highest stack level accepted unless configured otherwise.
pub const DEFAULT_MAX_STACK_LEVEL: i32 = 8;

/// A charging profile as installed by SetChargingProfile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    /// Profile id from the OCPP ChargingProfile object.
    pub profile_id: i32,
    /// Connector / EVSE id (0 = station-wide).
    pub connector_id: u32,
    /// Stack level (higher = higher priority).
    pub stack_level: i32,
    /// ChargePointMaxProfile, TxDefaultProfile, TxProfile, ...
    pub purpose: String,
    /// First schedule of the profile, as received.
    pub schedule: Value,
}

impl ChargingProfile {
    /// Build from the raw OCPP object. Works for both 1.6 (`chargingProfileId`,
    /// `chargingProfilePurpose`, `chargingSchedule`) and 2.0.1 (`id`,
    /// `chargingProfilePurpose`, `chargingSchedule[]`) shapes.
    pub fn from_ocpp(connector_id: u32, raw: &Value) -> Option<Self> {
        let profile_id = raw
            .get("chargingProfileId")
            .or_else(|| raw.get("id"))
            .and_then(Value::as_i64)?;
        let stack_level = raw.get("stackLevel").and_then(Value::as_i64)?;
        let purpose = raw
            .get("chargingProfilePurpose")
            .and_then(Value::as_str)?
            .to_string();
        let schedule = match raw.get("chargingSchedule") {
            Some(Value::Array(items)) => items.first().cloned().unwrap_or(Value::Null),
            Some(other) => other.clone(),
            None => Value::Null,
        };

        Some(Self {
            profile_id: i32::try_from(profile_id).ok()?,
            connector_id,
            stack_level: i32::try_from(stack_level).ok()?,
            purpose,
            schedule,
        })
    }
}

/// Filter used by ClearChargingProfile. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileCriteria {
    pub profile_id: Option<i32>,
    pub connector_id: Option<u32>,
    pub purpose: Option<String>,
    pub stack_level: Option<i32>,
}

impl ProfileCriteria {
    fn matches(&self, p: &ChargingProfile) -> bool {
        self.profile_id.map_or(true, |id| id == p.profile_id)
            && self.connector_id.map_or(true, |c| c == p.connector_id)
            && self.purpose.as_deref().map_or(true, |purpose| purpose == p.purpose)
            && self.stack_level.map_or(true, |s| s == p.stack_level)
    }
}

/// Why a profile was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileRejection {
    StackLevelTooHigh { stack_level: i32, max: i32 },
    UnknownConnector(u32),
}

/// In-memory profile table of one station.
#[derive(Debug, Clone)]
pub struct ChargingProfileStore {
    profiles: Vec<ChargingProfile>,
    max_stack_level: i32,
    connector_count: u32,
}

impl ChargingProfileStore {
    pub fn new(connector_count: u32) -> Self {
        Self {
            profiles: Vec::new(),
            max_stack_level: DEFAULT_MAX_STACK_LEVEL,
            connector_count,
        }
    }

    pub fn max_stack_level(&self) -> i32 {
        self.max_stack_level
    }

    /// Install a profile. A profile with the same id, or the same
    /// connector/purpose/stack level, is replaced.
    pub fn install(&mut self, profile: ChargingProfile) -> Result<(), ProfileRejection> {
        if profile.connector_id > self.connector_count {
            return Err(ProfileRejection::UnknownConnector(profile.connector_id));
        }
        if profile.stack_level < 0 || profile.stack_level > self.max_stack_level {
            return Err(ProfileRejection::StackLevelTooHigh {
                stack_level: profile.stack_level,
                max: self.max_stack_level,
            });
        }

        self.profiles.retain(|p| {
            p.profile_id != profile.profile_id
                && !(p.connector_id == profile.connector_id
                    && p.purpose == profile.purpose
                    && p.stack_level == profile.stack_level)
        });
        self.profiles.push(profile);
        Ok(())
    }

    /// Remove every profile matching `criteria`. Returns how many were removed.
    pub fn clear(&mut self, criteria: &ProfileCriteria) -> usize {
        let before = self.profiles.len();
        self.profiles.retain(|p| !criteria.matches(p));
        before - self.profiles.len()
    }

    /// Profile that governs `connector_id`: the highest stack level among
    /// profiles for that connector or station-wide ones.
    pub fn effective_for(&self, connector_id: u32) -> Option<&ChargingProfile> {
        self.profiles
            .iter()
            .filter(|p| p.connector_id == connector_id || p.connector_id == 0)
            .max_by_key(|p| (p.stack_level, p.connector_id))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
