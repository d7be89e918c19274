//! JSON payloads carried by count and status messages.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{IngestError, IngestResult};

/// Direction recorded when the device did not report one.
pub const UNKNOWN_DIRECTION: &str = "Unknown";

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];
const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Decoded body of a count message. Never fails: a broken payload still counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountPayload {
    pub direction: String,
    /// Device clock reading, only when both halves were present and valid.
    pub reading: Option<(NaiveDate, NaiveTime)>,
}

impl CountPayload {
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let Ok(body) = serde_json::from_slice::<Value>(raw) else {
            tracing::warn!("Count payload is not JSON, recording direction as unknown");
            return Self {
                direction: UNKNOWN_DIRECTION.to_string(),
                reading: None,
            };
        };

        let direction = match body.get("direction") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => UNKNOWN_DIRECTION.to_string(),
        };

        let date = body.get("reading_date").and_then(Value::as_str);
        let time = body.get("reading_time").and_then(Value::as_str);
        let reading = match (date, time) {
            (Some(d), Some(t)) if !d.is_empty() && !t.is_empty() => {
                match (parse_date(d), parse_time(t)) {
                    (Some(d), Some(t)) => Some((d, t)),
                    _ => {
                        tracing::warn!(
                            reading_date = d,
                            reading_time = t,
                            "Ignoring unparseable device reading time"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        Self { direction, reading }
    }
}

/// Decoded body of a status heartbeat. `device` and `timestamp` are mandatory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPayload {
    pub device: String,
    pub reported_at: DateTime<FixedOffset>,
    pub uptime: Option<String>,
    pub mqtt_connected: bool,
    pub dashboard_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    device: Option<String>,
    timestamp: Option<String>,
    #[serde(default)]
    uptime: Value,
    #[serde(default)]
    mqtt_connected: Value,
    #[serde(default)]
    dashboard_enabled: Value,
}

impl StatusPayload {
    /// # Errors
    ///
    /// Returns `IngestError::InvalidPayload` when the body is not JSON or a
    /// mandatory field is missing or unparseable.
    pub fn parse(raw: &[u8]) -> IngestResult<Self> {
        let body: RawStatus = serde_json::from_slice(raw)
            .map_err(|e| IngestError::InvalidPayload(format!("status body: {e}")))?;

        let device = body
            .device
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| IngestError::InvalidPayload("missing device".to_string()))?;
        let timestamp = body
            .timestamp
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| IngestError::InvalidPayload("missing timestamp".to_string()))?;
        let reported_at = parse_timestamp(&timestamp).ok_or_else(|| {
            IngestError::InvalidPayload(format!("unparseable timestamp {timestamp:?}"))
        })?;

        let uptime = match body.uptime {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        };

        Ok(Self {
            device,
            reported_at,
            uptime,
            mqtt_connected: truthy(&body.mqtt_connected),
            dashboard_enabled: truthy(&body.dashboard_enabled),
        })
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s.trim(), f).ok())
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(s.trim(), f).ok())
}

/// RFC 3339 or a naive ISO-like date-time, which is taken as UTC.
fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts);
    }
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Devices have sent booleans as `true`, `1` and `"true"`.
fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn count_payload_defaults_direction() {
        assert_eq!(CountPayload::parse(b"{}").direction, UNKNOWN_DIRECTION);
        assert_eq!(CountPayload::parse(b"not json").direction, UNKNOWN_DIRECTION);
        assert_eq!(
            CountPayload::parse(br#"{"direction":"  "}"#).direction,
            UNKNOWN_DIRECTION
        );
        assert_eq!(CountPayload::parse(br#"{"direction":2}"#).direction, "2");
    }

    #[test]
    fn reading_override_needs_both_halves() {
        let only_date = CountPayload::parse(br#"{"reading_date":"2025-06-01"}"#);
        assert_eq!(only_date.reading, None);

        let both = CountPayload::parse(
            br#"{"direction":"North","reading_date":"01/06/2025","reading_time":"07:15"}"#,
        );
        let (date, time) = both.reading.expect("reading override");
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(time.hour(), 7);
        assert_eq!(time.minute(), 15);

        let garbage =
            CountPayload::parse(br#"{"reading_date":"yesterday","reading_time":"07:15:00"}"#);
        assert_eq!(garbage.reading, None);
    }

    #[test]
    fn status_payload_requires_device_and_timestamp() {
        assert!(StatusPayload::parse(br#"{"timestamp":"2025-06-01T10:00:00"}"#).is_err());
        assert!(StatusPayload::parse(br#"{"device":"totem-1"}"#).is_err());
        assert!(StatusPayload::parse(br#"{"device":"totem-1","timestamp":"soon"}"#).is_err());
        assert!(StatusPayload::parse(b"nope").is_err());
    }

    #[test]
    fn status_payload_optional_fields() {
        let status = StatusPayload::parse(
            br#"{"device":"totem-1","timestamp":"2025-06-01T10:00:00","uptime":3600,"mqtt_connected":1,"dashboard_enabled":"true"}"#,
        )
        .unwrap();
        assert_eq!(status.uptime.as_deref(), Some("3600"));
        assert!(status.mqtt_connected);
        assert!(status.dashboard_enabled);
        assert_eq!(status.reported_at.offset().local_minus_utc(), 0);

        let bare =
            StatusPayload::parse(br#"{"device":"totem-1","timestamp":"2025-06-01T10:00:00-04:00"}"#)
                .unwrap();
        assert_eq!(bare.uptime, None);
        assert!(!bare.mqtt_connected);
        assert!(!bare.dashboard_enabled);
        assert_eq!(bare.reported_at.offset().local_minus_utc(), -4 * 3600);
    }
}
