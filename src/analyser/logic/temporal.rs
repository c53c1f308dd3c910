//! Lenient timestamp parsing used when a column is reinterpreted as time.
//!
//! Parsing never fails loudly: anything that does not match one of the known
//! layouts comes back as `None` and the caller stores a missing cell.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::types::Value;

/// Date-time layouts tried in order after RFC 3339.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S%.f",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
];

/// Date-only layouts; month-first wins for ambiguous slash dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%d %b %Y",
    "%b %d %Y", "%d %B %Y", "%B %d, %Y",
];

/// Parses a textual timestamp. Offsets are normalized to UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.naive_utc());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Interprets a number as Unix epoch seconds.
pub fn from_epoch_seconds(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    if whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return None;
    }
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos).map(|dt| dt.naive_utc())
}

/// Reinterprets one cell as a timestamp; anything unparseable becomes missing.
pub fn coerce_to_timestamp(value: &Value) -> Value {
    let parsed = match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Text(s) => parse_timestamp(s),
        Value::Int(v) => from_epoch_seconds(*v as f64),
        Value::Float(v) => from_epoch_seconds(*v),
        Value::Bool(_) | Value::Missing => None,
    };
    parsed.map_or(Value::Missing, Value::Timestamp)
}
