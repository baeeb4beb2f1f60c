//! Field normalizer: turns arbitrary record shapes into [`IncidentRecord`]s.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::CallbackError;
use crate::field_value::{as_finite_number, as_text, is_present, lookup_path};
use crate::ids::IncidentId;
use crate::incident::{DEFAULT_REPORTER_NAME, IncidentRecord, IncidentStatus, Location};
use crate::timestamp::normalize_timestamp;

pub type ResolverFn = Arc<dyn Fn(&Value) -> Result<Option<Value>, CallbackError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Id,
    Status,
    Name,
    Households,
    Address,
    Notes,
    Timestamp,
    Latitude,
    Longitude,
    Accuracy,
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Status => "status",
            Self::Name => "name",
            Self::Households => "households",
            Self::Address => "address",
            Self::Notes => "notes",
            Self::Timestamp => "timestamp",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Accuracy => "accuracy",
        }
    }

    fn default_paths(&self) -> &'static [&'static str] {
        match self {
            Self::Id => &["id", "ID"],
            Self::Status => &["status", "statusType", "type"],
            Self::Name => &["name", "reporter", "reporterName"],
            Self::Households => &["households", "occupants"],
            Self::Address => &["address", "locationNotes"],
            Self::Notes => &["notes", "note", "description"],
            Self::Timestamp => &["timestamp", "createdAt", "created_at", "time"],
            Self::Latitude => &["location.lat", "location.latitude", "lat", "latitude"],
            Self::Longitude => &[
                "location.lng",
                "location.lon",
                "location.longitude",
                "lng",
                "lon",
                "longitude",
            ],
            Self::Accuracy => &["location.accuracy", "accuracy"],
        }
    }
}

/// How one canonical field is located in a raw record.
#[derive(Clone)]
pub enum FieldResolver {
    Path(String),
    Alternatives(Vec<String>),
    Callback(ResolverFn),
}

impl FieldResolver {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<Option<Value>, CallbackError> + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }
}

impl fmt::Debug for FieldResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Self::Alternatives(a) => f.debug_tuple("Alternatives").field(a).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl<'de> Deserialize<'de> for FieldResolver {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Path(String),
            Alternatives(Vec<String>),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Path(p) => Self::Path(p),
            Repr::Alternatives(a) => Self::Alternatives(a),
        })
    }
}

/// Per-field resolver overrides. Fields without an override use the built-in
/// alternatives.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct FieldMap {
    overrides: HashMap<CanonicalField, FieldResolver>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: CanonicalField, resolver: FieldResolver) -> Self {
        self.overrides.insert(field, resolver);
        self
    }

    pub fn set(&mut self, field: CanonicalField, resolver: FieldResolver) {
        self.overrides.insert(field, resolver);
    }

    /// Resolve a field against a raw record. Callback failures are logged and
    /// count as "no value".
    pub fn resolve(&self, field: CanonicalField, raw: &Value) -> Option<Value> {
        match self.overrides.get(&field) {
            Some(FieldResolver::Path(path)) => first_present(raw, std::iter::once(path.as_str())),
            Some(FieldResolver::Alternatives(paths)) => {
                first_present(raw, paths.iter().map(String::as_str))
            }
            Some(FieldResolver::Callback(f)) => match f(raw) {
                Ok(value) => value.filter(is_present),
                Err(e) => {
                    tracing::warn!(field = field.as_str(), error = %e, "field resolver failed");
                    None
                }
            },
            None => first_present(raw, field.default_paths().iter().copied()),
        }
    }
}

fn first_present<'a>(raw: &Value, paths: impl IntoIterator<Item = &'a str>) -> Option<Value> {
    paths
        .into_iter()
        .filter_map(|path| lookup_path(raw, path))
        .find(|v| is_present(v))
        .cloned()
}

fn coerce_households(value: Option<Value>) -> Option<NonZeroU32> {
    let n = value.as_ref().and_then(as_finite_number)?.trunc();
    if n < 1.0 || n > f64::from(u32::MAX) {
        return None;
    }
    NonZeroU32::new(n as u32)
}

fn text_or(value: Option<Value>, default: &str) -> String {
    value
        .as_ref()
        .and_then(as_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Normalize one raw record. Returns `None` when `id` or `timestamp` cannot be
/// resolved.
pub fn normalize(raw: &Value, map: &FieldMap) -> Option<IncidentRecord> {
    let id = map
        .resolve(CanonicalField::Id, raw)
        .as_ref()
        .and_then(as_text)
        .filter(|s| !s.is_empty())?;
    let timestamp = map
        .resolve(CanonicalField::Timestamp, raw)
        .as_ref()
        .and_then(normalize_timestamp)?;

    let status = map
        .resolve(CanonicalField::Status, raw)
        .as_ref()
        .and_then(as_text)
        .map(|s| IncidentStatus::parse_lenient(&s))
        .unwrap_or_default();

    let lat = map.resolve(CanonicalField::Latitude, raw).as_ref().and_then(as_finite_number);
    let lng = map.resolve(CanonicalField::Longitude, raw).as_ref().and_then(as_finite_number);
    let location = match (lat, lng) {
        (Some(lat), Some(lng)) => {
            let accuracy = map
                .resolve(CanonicalField::Accuracy, raw)
                .as_ref()
                .and_then(as_finite_number);
            Location::new(lat, lng, accuracy)
        }
        _ => None,
    };

    Some(IncidentRecord {
        id: IncidentId::from(id),
        status,
        name: text_or(map.resolve(CanonicalField::Name, raw), DEFAULT_REPORTER_NAME),
        households: coerce_households(map.resolve(CanonicalField::Households, raw)),
        address: text_or(map.resolve(CanonicalField::Address, raw), ""),
        notes: text_or(map.resolve(CanonicalField::Notes, raw), ""),
        timestamp,
        location,
    })
}

/// A typed record in the form storage will give back: ISO timestamp, trimmed
/// text, defaults applied. `None` when the id or timestamp is blank.
pub fn canonicalize(record: &IncidentRecord) -> Option<IncidentRecord> {
    normalize(&record.to_json(), &FieldMap::default())
}

/// Normalize a batch, dropping rejects.
pub fn normalize_all<'a>(raws: impl IntoIterator<Item = &'a Value>, map: &FieldMap) -> Vec<IncidentRecord> {
    raws.into_iter()
        .filter_map(|raw| {
            let record = normalize(raw, map);
            if record.is_none() {
                tracing::warn!("dropping incident record without id or timestamp");
            }
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_record_normalizes() {
        let raw = json!({
            "id": "r-1",
            "status": "Need_Medical",
            "name": "  Ana ",
            "households": "4",
            "address": "Barangay 12",
            "notes": "insulin",
            "timestamp": "2024-05-01T08:00:00Z",
            "location": {"lat": "14.6", "lng": 121.05, "accuracy": 12.4}
        });
        let record = normalize(&raw, &FieldMap::default()).unwrap();
        assert_eq!(record.id.as_str(), "r-1");
        assert_eq!(record.status, IncidentStatus::NeedMedical);
        assert_eq!(record.name, "Ana");
        assert_eq!(record.households.map(|h| h.get()), Some(4));
        assert_eq!(record.timestamp, "2024-05-01T08:00:00.000Z");
        let loc = record.location.unwrap();
        assert_eq!((loc.lat, loc.lng, loc.accuracy), (14.6, 121.05, Some(12.4)));
    }

    #[test]
    fn missing_id_or_timestamp_rejects() {
        let map = FieldMap::default();
        assert!(normalize(&json!({"timestamp": "2024-01-01T00:00:00Z"}), &map).is_none());
        assert!(normalize(&json!({"id": "x"}), &map).is_none());
        assert!(normalize(&json!({"id": "", "timestamp": "2024-01-01"}), &map).is_none());
        assert!(normalize(&json!("just a string"), &map).is_none());
    }

    #[test]
    fn uppercase_id_and_numeric_ids_resolve() {
        let map = FieldMap::default();
        let record = normalize(&json!({"ID": 42, "createdAt": 1_704_067_200_000i64}), &map).unwrap();
        assert_eq!(record.id.as_str(), "42");
        assert_eq!(record.timestamp, "2024-01-01T00:00:00.000Z");
        assert_eq!(record.name, DEFAULT_REPORTER_NAME);
        assert_eq!(record.status, IncidentStatus::NeedHelp);
    }

    #[test]
    fn households_coercion() {
        let map = FieldMap::default();
        let households = |v: Value| {
            normalize(&json!({"id": "h", "timestamp": "2024-01-01", "households": v}), &map)
                .unwrap()
                .households
                .map(|h| h.get())
        };
        assert_eq!(households(json!(0)), None);
        assert_eq!(households(json!(-3)), None);
        assert_eq!(households(json!("many")), None);
        assert_eq!(households(json!(null)), None);
        assert_eq!(households(json!(0.5)), None);
        assert_eq!(households(json!(7)), Some(7));
        assert_eq!(households(json!(2.9)), Some(2));
    }

    #[test]
    fn location_needs_both_coordinates() {
        let map = FieldMap::default();
        let only_lat = normalize(&json!({"id": "l", "timestamp": "2024-01-01", "lat": 1.0}), &map).unwrap();
        assert!(only_lat.location.is_none());
        let flat = normalize(&json!({"id": "l", "timestamp": "2024-01-01", "lat": 1.0, "lon": 2.0}), &map).unwrap();
        assert_eq!(flat.location.map(|l| (l.lat, l.lng)), Some((1.0, 2.0)));
        assert_eq!(flat.location.and_then(|l| l.accuracy), None);
    }

    #[test]
    fn alternatives_first_present_wins() {
        let map = FieldMap::new().with(
            CanonicalField::Notes,
            FieldResolver::Alternatives(vec!["details.text".into(), "summary".into()]),
        );
        let raw = json!({"id": "a", "timestamp": "2024-01-01", "details": {"text": ""}, "summary": "roof gone"});
        assert_eq!(normalize(&raw, &map).unwrap().notes, "roof gone");
    }

    #[test]
    fn single_path_override_replaces_defaults() {
        let map = FieldMap::new().with(CanonicalField::Id, FieldResolver::Path("meta.uuid".into()));
        let raw = json!({"id": "ignored", "meta": {"uuid": "u-9"}, "timestamp": "2024-01-01"});
        assert_eq!(normalize(&raw, &map).unwrap().id.as_str(), "u-9");
    }

    #[test]
    fn callback_failure_counts_as_missing() {
        let map = FieldMap::new()
            .with(CanonicalField::Name, FieldResolver::callback(|_| Err("boom".into())))
            .with(
                CanonicalField::Status,
                FieldResolver::callback(|raw| Ok(raw.get("kind").map(|k| json!(format!("need_{}", k.as_str().unwrap_or("")))))),
            );
        let raw = json!({"id": "c", "timestamp": "2024-01-01", "name": "Ben", "kind": "evacuation"});
        let record = normalize(&raw, &map).unwrap();
        assert_eq!(record.name, DEFAULT_REPORTER_NAME);
        assert_eq!(record.status, IncidentStatus::NeedEvacuation);
    }

    #[test]
    fn field_map_deserializes_paths_and_lists() {
        let map: FieldMap = serde_json::from_value(json!({
            "id": "incident_id",
            "timestamp": ["reported_at", "created"]
        }))
        .unwrap();
        let raw = json!({"incident_id": "z", "created": "2024-02-02T00:00:00Z"});
        let record = normalize(&raw, &map).unwrap();
        assert_eq!(record.id.as_str(), "z");
        assert_eq!(record.timestamp, "2024-02-02T00:00:00.000Z");
    }

    #[test]
    fn canonical_record_renormalizes_to_itself() {
        let raw = json!({"id": "same", "timestamp": "2024-01-01T00:00:00Z", "households": 3,
                         "location": {"lat": 1.5, "lng": 2.5}});
        let map = FieldMap::default();
        let first = normalize(&raw, &map).unwrap();
        let second = normalize(&first.to_json(), &map).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn canonicalize_rejects_blank_identity_and_fixes_time() {
        let mut record = IncidentRecord::new("a".into(), IncidentStatus::Safe, "2024-01-01T00:00:00Z");
        record.name = String::new();
        record.notes = " wet ".into();
        let canonical = canonicalize(&record).unwrap();
        assert_eq!(canonical.timestamp, "2024-01-01T00:00:00.000Z");
        assert_eq!(canonical.name, DEFAULT_REPORTER_NAME);
        assert_eq!(canonical.notes, "wet");
        assert_eq!(canonical.status, IncidentStatus::Safe);

        assert!(canonicalize(&IncidentRecord::new("".into(), IncidentStatus::NeedHelp, "2024-01-01T00:00:00Z")).is_none());
        assert!(canonicalize(&IncidentRecord::new("b".into(), IncidentStatus::NeedHelp, "  ")).is_none());
    }
}
