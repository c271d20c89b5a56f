//! Decoder for marker payloads
//!
//! Snapshot responses are an array of records (a named lookup may also return
//! a bare object), push messages carry exactly one record. Records that fail
//! to decode are dropped individually; the rest of the batch is kept.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{trace, warn};

use super::error::DecodeError;
use super::marker::MarkerRecord;

/// Records decoded from one payload plus the count of dropped entries
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub records: Vec<MarkerRecord>,
    pub dropped: usize,
}

/// Decode a snapshot body: an array of records or a single record.
///
/// Fails only if the body is not JSON or has an unusable top-level shape.
pub fn decode_batch(body: &str) -> Result<DecodedBatch, DecodeError> {
    trace!(len = body.len(), "Decoding marker batch");

    let json: Value = serde_json::from_str(body).map_err(|e| DecodeError::Json(e.to_string()))?;
    decode_batch_value(&json)
}

pub fn decode_batch_value(json: &Value) -> Result<DecodedBatch, DecodeError> {
    let items: Vec<&Value> = match json {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![json],
        other => return Err(DecodeError::UnexpectedShape(json_kind(other))),
    };

    let mut batch = DecodedBatch::default();
    for item in items {
        match decode_record(item) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                warn!(error = %e, "Dropping malformed marker record");
                batch.dropped += 1;
            }
        }
    }
    Ok(batch)
}

/// Decode one push message
pub fn decode_message(msg: &str) -> Result<MarkerRecord, DecodeError> {
    let json: Value = serde_json::from_str(msg).map_err(|e| DecodeError::Json(e.to_string()))?;
    decode_record(&json)
}

pub fn decode_record(json: &Value) -> Result<MarkerRecord, DecodeError> {
    if !json.is_object() {
        return Err(DecodeError::UnexpectedShape(json_kind(json)));
    }

    let name = json["name"]
        .as_str()
        .filter(|n| !n.is_empty())
        .ok_or(DecodeError::MissingField("name"))?;
    let latitude = coordinate(json, "latitude", 90.0)?;
    let longitude = coordinate(json, "longitude", 180.0)?;
    let timestamp = match &json["timestamp"] {
        Value::String(s) => parse_timestamp(s)?,
        Value::Null => return Err(DecodeError::MissingField("timestamp")),
        other => return Err(DecodeError::InvalidTimestamp(other.to_string())),
    };

    Ok(MarkerRecord::new(name, latitude, longitude, timestamp))
}

/// Numbers and numeric strings are accepted; anything else is malformed
fn coordinate(json: &Value, field: &'static str, limit: f64) -> Result<f64, DecodeError> {
    let raw = &json[field];
    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => return Err(DecodeError::MissingField(field)),
        _ => None,
    };

    match value {
        Some(v) if v.is_finite() && v.abs() <= limit => Ok(v),
        _ => Err(DecodeError::InvalidCoordinate {
            field,
            value: raw.to_string(),
        }),
    }
}

/// RFC 3339, or an ISO-8601 local time without offset (read as UTC)
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| DecodeError::InvalidTimestamp(s.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_snapshot_array() {
        let body = r#"[
            {"name": "alice", "latitude": 52.52, "longitude": 13.405, "timestamp": "2024-05-01T12:00:00Z"},
            {"name": "bob", "latitude": "48.137", "longitude": "11.575", "timestamp": "2024-05-01T12:00:30.250+02:00"}
        ]"#;

        let batch = decode_batch(body).unwrap();
        assert_eq!(batch.dropped, 0);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].name, "alice");
        assert_eq!(
            batch.records[0].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(batch.records[1].latitude, 48.137);
    }

    #[test]
    fn test_single_object_normalized_to_batch() {
        let body = r#"{"name": "alice", "latitude": 1.0, "longitude": 2.0, "timestamp": "2024-05-01T12:00:00"}"#;
        let batch = decode_batch(body).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].longitude, 2.0);
    }

    #[test]
    fn test_malformed_records_dropped_rest_kept() {
        let body = r#"[
            {"name": "ok", "latitude": 1.0, "longitude": 2.0, "timestamp": "2024-05-01T12:00:00Z"},
            {"name": "no-lat", "longitude": 2.0, "timestamp": "2024-05-01T12:00:00Z"},
            {"name": "bad-lng", "latitude": 1.0, "longitude": "east", "timestamp": "2024-05-01T12:00:00Z"},
            {"name": "far", "latitude": 91.0, "longitude": 2.0, "timestamp": "2024-05-01T12:00:00Z"},
            {"name": "bad-ts", "latitude": 1.0, "longitude": 2.0, "timestamp": "yesterday"},
            42
        ]"#;

        let batch = decode_batch(body).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].name, "ok");
        assert_eq!(batch.dropped, 5);
    }

    #[test]
    fn test_invalid_json_is_batch_error() {
        assert!(matches!(decode_batch("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode_batch("\"text\""),
            Err(DecodeError::UnexpectedShape("string"))
        ));
    }

    #[test]
    fn test_decode_message_missing_name() {
        let msg = r#"{"latitude": 1.0, "longitude": 2.0, "timestamp": "2024-05-01T12:00:00Z"}"#;
        assert_eq!(decode_message(msg), Err(DecodeError::MissingField("name")));
    }
}
