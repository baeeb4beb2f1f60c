//! Reported-time handling.
//!
//! Incident timestamps arrive in whatever shape the source produced: epoch
//! milliseconds, RFC 3339, RFC 2822, or a naive `YYYY-MM-DD HH:MM:SS`. They are
//! stored as ISO-8601 (`YYYY-MM-DDTHH:MM:SS.sssZ`) when parseable and verbatim
//! otherwise, so ordering always goes through [`sort_key`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Current instant as an ISO-8601 string.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp string into an instant. Returns `None` when no supported
/// format matches.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    None
}

/// Convert epoch milliseconds into an instant.
pub fn from_epoch_ms(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis(ms.trunc() as i64)
}

/// Normalize a raw timestamp value. Numbers are epoch milliseconds, strings
/// are parsed and re-emitted as ISO-8601 or passed through verbatim.
pub fn normalize_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_f64().and_then(from_epoch_ms).map(to_iso),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            Some(parse_instant(trimmed).map(to_iso).unwrap_or_else(|| trimmed.to_string()))
        }
        _ => None,
    }
}

/// Milliseconds since epoch used for recency ordering; unparseable values sort
/// as epoch 0.
pub fn sort_key(raw: &str) -> i64 {
    parse_instant(raw).map(|dt| dt.timestamp_millis()).unwrap_or(0)
}
