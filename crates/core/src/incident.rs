use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use crate::ids::IncidentId;
use crate::timestamp;

pub const DEFAULT_REPORTER_NAME: &str = "Unnamed reporter";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    NeedHelp,
    NeedMedical,
    NeedEvacuation,
    Safe,
}

impl IncidentStatus {
    pub const ALL: [IncidentStatus; 4] = [
        Self::NeedHelp,
        Self::NeedMedical,
        Self::NeedEvacuation,
        Self::Safe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedHelp => "need_help",
            Self::NeedMedical => "need_medical",
            Self::NeedEvacuation => "need_evacuation",
            Self::Safe => "safe",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NeedHelp => "Need Help",
            Self::NeedMedical => "Need Medical Attention",
            Self::NeedEvacuation => "Need Evacuation",
            Self::Safe => "Safe",
        }
    }

    /// Case-insensitive match against the closed set; anything else is `NeedHelp`.
    pub fn parse_lenient(s: &str) -> Self {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(needle))
            .unwrap_or(Self::NeedHelp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl Location {
    /// Build a location only when both coordinates are finite.
    pub fn new(lat: f64, lng: f64, accuracy: Option<f64>) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        Some(Self {
            lat,
            lng,
            accuracy: accuracy.filter(|a| a.is_finite()),
        })
    }
}

/// Canonical incident report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: IncidentId,
    pub status: IncidentStatus,
    pub name: String,
    pub households: Option<NonZeroU32>,
    pub address: String,
    pub notes: String,
    pub timestamp: String,
    pub location: Option<Location>,
}

impl IncidentRecord {
    pub fn new(id: IncidentId, status: IncidentStatus, timestamp: impl Into<String>) -> Self {
        Self {
            id,
            status,
            name: DEFAULT_REPORTER_NAME.to_string(),
            households: None,
            address: String::new(),
            notes: String::new(),
            timestamp: timestamp.into(),
            location: None,
        }
    }

    /// Recency key: epoch milliseconds, 0 for unparseable timestamps.
    pub fn sort_key(&self) -> i64 {
        timestamp::sort_key(&self.timestamp)
    }

    pub fn has_valid_timestamp(&self) -> bool {
        timestamp::parse_instant(&self.timestamp).is_some()
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Serializing plain data into a Value cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// What a field user fills in before a report gets an identity and a time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentDraft {
    pub status: IncidentStatus,
    pub name: String,
    pub households: Option<u32>,
    pub address: String,
    pub notes: String,
    pub location: Option<Location>,
}

impl IncidentDraft {
    pub fn into_record(self) -> IncidentRecord {
        let name = self.name.trim();
        IncidentRecord {
            id: IncidentId::new(),
            status: self.status,
            name: if name.is_empty() {
                DEFAULT_REPORTER_NAME.to_string()
            } else {
                name.to_string()
            },
            households: self.households.and_then(NonZeroU32::new),
            address: self.address.trim().to_string(),
            notes: self.notes.trim().to_string(),
            timestamp: timestamp::now_iso(),
            location: self.location,
        }
    }
}
