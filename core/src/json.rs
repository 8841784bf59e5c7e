//! Reference JSON codec for [`Message`]
//!
//! Encodes a message as a JSON object with the keys `timestamp` (RFC-3339
//! with nanoseconds), `type`, `logger`, `severity`, `payload`,
//! `env_version`, `metlog_pid`, `metlog_hostname`, and `fields`. Absent
//! attributes are omitted and stay absent after decoding; the identifier
//! is never emitted, so a decoded message comes back with its identifier
//! reset (a `uuid` key is honored on input when present).
//!
//! The `fields` object maps a field name to a scalar (single-value field)
//! or an array of scalars (multi-value field). Nested objects flatten into
//! dot-separated names, nested arrays into `.N` index segments. JSON
//! numbers decode as DOUBLE fields, strings as STRING, booleans as BOOL —
//! INTEGER fields therefore encode losslessly but come back as DOUBLE,
//! and BYTES fields have no JSON representation and are skipped.

use crate::message::{Field, FieldValue, Message, ValueFormat};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use uuid::Uuid;

/// Error returned by [`encode`] and [`decode`].
#[derive(Error, Debug)]
pub enum CodecError {
    /// The input was not valid JSON
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// The top-level JSON value was not an object
    #[error("message must be a JSON object")]
    NotAnObject,

    /// The `timestamp` key could not be interpreted
    #[error("invalid timestamp {value:?}: {reason}")]
    Timestamp {
        /// The offending timestamp representation
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// A value under `fields` has no field representation
    #[error("unsupported value under fields at {path:?}")]
    UnsupportedValue {
        /// Dot-separated path of the offending value
        path: String,
    },

    /// A multi-value array mixed value types
    #[error(transparent)]
    Field(#[from] crate::message::FieldError),
}

/// Encode a message into its reference JSON representation.
pub fn encode(msg: &Message) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&to_value(msg))?)
}

/// Encode a message as a [`serde_json::Value`].
pub fn to_value(msg: &Message) -> Value {
    let mut obj = Map::new();
    if let Some(ts) = msg.timestamp() {
        let rendered = DateTime::<Utc>::from_timestamp_nanos(ts)
            .to_rfc3339_opts(SecondsFormat::Nanos, true);
        obj.insert("timestamp".to_string(), Value::String(rendered));
    }
    if let Some(v) = msg.message_type() {
        obj.insert("type".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = msg.logger() {
        obj.insert("logger".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = msg.severity() {
        obj.insert("severity".to_string(), Value::from(v));
    }
    if let Some(v) = msg.payload() {
        obj.insert("payload".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = msg.env_version() {
        obj.insert("env_version".to_string(), Value::String(v.to_string()));
    }
    if let Some(v) = msg.pid() {
        obj.insert("metlog_pid".to_string(), Value::from(v));
    }
    if let Some(v) = msg.hostname() {
        obj.insert("metlog_hostname".to_string(), Value::String(v.to_string()));
    }

    let mut fields = Map::new();
    for field in msg.fields() {
        if let Some(value) = field_to_value(field) {
            // A JSON object cannot carry duplicate keys; for recurring
            // field names the last occurrence wins.
            fields.insert(field.name().to_string(), value);
        }
    }
    obj.insert("fields".to_string(), Value::Object(fields));

    Value::Object(obj)
}

fn field_to_value(field: &Field) -> Option<Value> {
    let values: Vec<Value> = if let Some(v) = field.as_strings() {
        v.iter().map(|s| Value::String(s.clone())).collect()
    } else if let Some(v) = field.as_integers() {
        v.iter().map(|i| Value::from(*i)).collect()
    } else if let Some(v) = field.as_doubles() {
        v.iter()
            .map(|d| Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null))
            .collect()
    } else if let Some(v) = field.as_bools() {
        v.iter().map(|b| Value::Bool(*b)).collect()
    } else {
        // BYTES fields have no JSON representation
        return None;
    };

    match values.len() {
        0 => None,
        1 => values.into_iter().next(),
        _ => Some(Value::Array(values)),
    }
}

/// Decode the reference JSON representation into a message.
pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    let root: Value = serde_json::from_slice(data)?;
    let obj = root.as_object().ok_or(CodecError::NotAnObject)?;

    let mut msg = Message::default();

    if let Some(text) = obj.get("uuid").and_then(Value::as_str) {
        if let Ok(uuid) = Uuid::parse_str(text) {
            msg.set_uuid(uuid);
        }
    }
    if let Some(value) = obj.get("timestamp") {
        let text = value.as_str().ok_or_else(|| CodecError::Timestamp {
            value: value.to_string(),
            reason: "not a string".to_string(),
        })?;
        let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| CodecError::Timestamp {
            value: text.to_string(),
            reason: e.to_string(),
        })?;
        let nanos = parsed
            .timestamp_nanos_opt()
            .ok_or_else(|| CodecError::Timestamp {
                value: text.to_string(),
                reason: "out of nanosecond range".to_string(),
            })?;
        msg.set_timestamp(nanos);
    }
    if let Some(v) = obj.get("type").and_then(Value::as_str) {
        msg.set_message_type(v);
    }
    if let Some(v) = obj.get("logger").and_then(Value::as_str) {
        msg.set_logger(v);
    }
    if let Some(v) = obj.get("severity").and_then(Value::as_i64) {
        msg.set_severity(v as i32);
    }
    if let Some(v) = obj.get("payload").and_then(Value::as_str) {
        msg.set_payload(v);
    }
    if let Some(v) = obj.get("env_version").and_then(Value::as_str) {
        msg.set_env_version(v);
    }
    if let Some(v) = obj.get("metlog_pid").and_then(Value::as_i64) {
        msg.set_pid(v as i32);
    }
    if let Some(v) = obj.get("metlog_hostname").and_then(Value::as_str) {
        msg.set_hostname(v);
    }
    if let Some(fields) = obj.get("fields").and_then(Value::as_object) {
        flatten_map(fields, &mut msg, "")?;
    }

    Ok(msg)
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn flatten_map(map: &Map<String, Value>, msg: &mut Message, path: &str) -> Result<(), CodecError> {
    for (key, value) in map {
        flatten_value(value, msg, &child_path(path, key))?;
    }
    Ok(())
}

fn flatten_array(items: &[Value], msg: &mut Message, path: &str) -> Result<(), CodecError> {
    let Some(first) = items.first() else {
        return Ok(());
    };
    match scalar_value(first, path)? {
        Some(head) => {
            // Array of scalars: one multi-value field, homogeneity enforced.
            let mut field = Field::new(path, head, ValueFormat::Raw);
            for item in &items[1..] {
                let value = scalar_value(item, path)?.ok_or_else(|| {
                    CodecError::UnsupportedValue {
                        path: path.to_string(),
                    }
                })?;
                field.add_value(value)?;
            }
            msg.add_field(field);
        }
        None => {
            // Array of containers: recurse with index segments.
            for (i, item) in items.iter().enumerate() {
                flatten_value(item, msg, &format!("{path}.{i}"))?;
            }
        }
    }
    Ok(())
}

fn flatten_value(value: &Value, msg: &mut Message, path: &str) -> Result<(), CodecError> {
    match value {
        Value::Array(items) => flatten_array(items, msg, path)?,
        Value::Object(map) => flatten_map(map, msg, path)?,
        other => {
            let scalar = scalar_value(other, path)?.ok_or_else(|| CodecError::UnsupportedValue {
                path: path.to_string(),
            })?;
            msg.add_field(Field::new(path, scalar, ValueFormat::Raw));
        }
    }
    Ok(())
}

fn scalar_value(value: &Value, path: &str) -> Result<Option<FieldValue>, CodecError> {
    match value {
        Value::String(s) => Ok(Some(FieldValue::String(s.clone()))),
        Value::Number(n) => {
            let v = n.as_f64().ok_or_else(|| CodecError::UnsupportedValue {
                path: path.to_string(),
            })?;
            Ok(Some(FieldValue::Double(v)))
        }
        Value::Bool(b) => Ok(Some(FieldValue::Bool(*b))),
        Value::Null => Err(CodecError::UnsupportedValue {
            path: path.to_string(),
        }),
        Value::Array(_) | Value::Object(_) => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::message::ValueType;

    fn sample_message() -> Message {
        let mut msg = Message::default();
        msg.set_uuid(Uuid::new_v4());
        msg.set_timestamp(1_355_270_400_123_456_789);
        msg.set_message_type("timer");
        msg.set_logger("app.metrics");
        msg.set_severity(6);
        msg.set_payload("37");
        msg.set_env_version("0.8");
        msg.set_pid(4321);
        msg.set_hostname("worker-3");
        msg.add_field(Field::new("name", FieldValue::String("db.query".to_string()), ValueFormat::Raw));
        msg.add_field(Field::new("rate", FieldValue::Double(0.5), ValueFormat::Raw));
        msg.add_field(Field::new("ok", FieldValue::Bool(true), ValueFormat::Raw));
        let mut series = Field::new("samples", FieldValue::Double(1.0), ValueFormat::Raw);
        series.add_value(FieldValue::Double(2.0)).unwrap();
        series.add_value(FieldValue::Double(3.0)).unwrap();
        msg.add_field(series);
        msg
    }

    #[test]
    fn round_trip_resets_identifier_only() {
        let original = sample_message();
        let encoded = encode(&original).unwrap();
        let decoded = decode(&encoded).unwrap();

        assert_eq!(decoded.uuid(), None, "the identifier is never emitted");

        // The original with the identifier reset
        let mut expected = Message::default();
        expected.set_timestamp(original.timestamp().unwrap());
        expected.set_message_type(original.message_type().unwrap());
        expected.set_logger(original.logger().unwrap());
        expected.set_severity(original.severity().unwrap());
        expected.set_payload(original.payload().unwrap());
        expected.set_env_version(original.env_version().unwrap());
        expected.set_pid(original.pid().unwrap());
        expected.set_hostname(original.hostname().unwrap());
        for field in original.fields() {
            expected.add_field(field.clone());
        }
        assert_eq!(decoded, expected);
    }

    #[test]
    fn timestamp_renders_rfc3339_nanoseconds() {
        let mut msg = Message::default();
        msg.set_timestamp(1_355_270_400_123_456_789);
        let value = to_value(&msg);
        assert_eq!(
            value["timestamp"],
            Value::String("2012-12-12T00:00:00.123456789Z".to_string())
        );
    }

    #[test]
    fn absent_attributes_stay_absent() {
        let msg = Message::default();
        let encoded = encode(&msg).unwrap();
        let decoded = decode(&encoded).unwrap();

        assert_eq!(decoded, Message::default());

        let value = to_value(&msg);
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("severity"));
        assert!(!obj.contains_key("payload"));
        assert!(obj.contains_key("fields"));
    }

    #[test]
    fn uuid_key_is_honored_on_input() {
        let uuid = Uuid::new_v4();
        let input = format!(r#"{{"uuid": "{uuid}", "type": "t"}}"#);
        let msg = decode(input.as_bytes()).unwrap();
        assert_eq!(msg.uuid(), Some(uuid));
    }

    #[test]
    fn nested_objects_flatten_with_dots() {
        let input = br#"{"fields": {"http": {"status": 200.0, "req": {"method": "GET"}}}}"#;
        let msg = decode(input).unwrap();

        let status = msg.find_first_field("http.status").unwrap();
        assert_eq!(status.as_doubles(), Some(&[200.0][..]));

        let method = msg.find_first_field("http.req.method").unwrap();
        assert_eq!(method.as_strings().map(|s| s[0].as_str()), Some("GET"));
    }

    #[test]
    fn scalar_arrays_become_multi_value_fields() {
        let input = br#"{"fields": {"tags": ["a", "b", "c"]}}"#;
        let msg = decode(input).unwrap();

        let tags = msg.find_first_field("tags").unwrap();
        assert_eq!(tags.value_type(), ValueType::String);
        assert_eq!(tags.len(), 3);
    }

    #[test]
    fn nested_arrays_flatten_with_index_segments() {
        let input = br#"{"fields": {"grid": [[1.0, 2.0], [3.0]]}}"#;
        let msg = decode(input).unwrap();

        assert_eq!(
            msg.find_first_field("grid.0").unwrap().as_doubles(),
            Some(&[1.0, 2.0][..])
        );
        assert_eq!(
            msg.find_first_field("grid.1").unwrap().as_doubles(),
            Some(&[3.0][..])
        );
    }

    #[test]
    fn mixed_scalar_array_is_rejected() {
        let input = br#"{"fields": {"mixed": ["a", 1.0]}}"#;
        let err = decode(input).unwrap_err();
        assert!(matches!(err, CodecError::Field(_)));
    }

    #[test]
    fn null_field_value_is_rejected() {
        let input = br#"{"fields": {"gone": null}}"#;
        let err = decode(input).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedValue { .. }));
    }

    #[test]
    fn numbers_decode_as_double() {
        let mut msg = Message::default();
        msg.add_field(Field::new("count", FieldValue::Integer(7), ValueFormat::Raw));

        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        let count = decoded.find_first_field("count").unwrap();
        assert_eq!(count.value_type(), ValueType::Double);
        assert_eq!(count.as_doubles(), Some(&[7.0][..]));
    }

    #[test]
    fn bytes_fields_are_skipped_on_encode() {
        let mut msg = Message::default();
        msg.add_field(Field::new("blob", FieldValue::Bytes(vec![1, 2, 3]), ValueFormat::Raw));

        let value = to_value(&msg);
        assert!(value["fields"].as_object().unwrap().is_empty());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(decode(b"not json"), Err(CodecError::Parse(_))));
        assert!(matches!(decode(b"[1, 2]"), Err(CodecError::NotAnObject)));
    }

    #[test]
    fn invalid_timestamp_is_an_error() {
        let err = decode(br#"{"timestamp": "yesterday"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Timestamp { .. }));
    }
}
