//! The Message type for virta
//!
//! A Message is the structured event record that flows through the
//! pipeline. Every scalar attribute is optional: an absent attribute is
//! distinct from a zero value, which matters for codecs that must not
//! invent data the source never sent.
//!
//! # Fields
//!
//! Beyond the fixed scalar attributes, a message carries an ordered
//! sequence of [`Field`]s: named, typed, multi-valued attributes. A field
//! is homogeneous (every value appended must match the value type the
//! field was created with), but a message may carry several fields under
//! the same name (recurring-key semantics):
//!
//! ```
//! use virta_core::{Field, FieldValue, Message, ValueFormat};
//!
//! let mut msg = Message::default();
//! msg.set_message_type("counter");
//! msg.add_field(Field::new("rate", FieldValue::Double(0.5), ValueFormat::Raw));
//! msg.add_field(Field::new("rate", FieldValue::Double(1.0), ValueFormat::Raw));
//!
//! assert_eq!(msg.find_all_fields("rate").len(), 2);
//! ```

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Largest framed header the pipeline will buffer for a single message.
pub const MAX_HEADER_SIZE: usize = 255;

/// Largest encoded message the pipeline will buffer.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Error raised by [`Field::add_value`] when an append would violate the
/// field's declared value type. The field is left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The appended value's type differs from the field's declared type
    #[error("field {name:?} holds {expected} values, cannot append {actual}")]
    TypeMismatch {
        /// Name of the field the append targeted
        name: String,
        /// The field's declared value type
        expected: ValueType,
        /// The type of the rejected value
        actual: ValueType,
    },
}

/// The closed set of value types a [`Field`] may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// UTF-8 string values
    String,
    /// Raw byte-sequence values
    Bytes,
    /// Signed 64-bit integer values
    Integer,
    /// 64-bit floating point values
    Double,
    /// Boolean values
    Bool,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::String => "STRING",
            ValueType::Bytes => "BYTES",
            ValueType::Integer => "INTEGER",
            ValueType::Double => "DOUBLE",
            ValueType::Bool => "BOOL",
        };
        f.write_str(name)
    }
}

/// Representation hint attached to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueFormat {
    /// Values carry no particular representation
    #[default]
    Raw,
    /// Values are measurements in some unit
    Units,
}

/// A single typed value, used to construct fields and append to them.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A UTF-8 string
    String(String),
    /// A raw byte sequence
    Bytes(Vec<u8>),
    /// A signed 64-bit integer
    Integer(i64),
    /// A 64-bit float
    Double(f64),
    /// A boolean
    Bool(bool),
}

impl FieldValue {
    /// The [`ValueType`] this value belongs to.
    pub fn value_type(&self) -> ValueType {
        match self {
            FieldValue::String(_) => ValueType::String,
            FieldValue::Bytes(_) => ValueType::Bytes,
            FieldValue::Integer(_) => ValueType::Integer,
            FieldValue::Double(_) => ValueType::Double,
            FieldValue::Bool(_) => ValueType::Bool,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// Homogeneous value storage, one vector per value type.
#[derive(Debug, Clone, PartialEq)]
enum Values {
    String(Vec<String>),
    Bytes(Vec<Vec<u8>>),
    Integer(Vec<i64>),
    Double(Vec<f64>),
    Bool(Vec<bool>),
}

impl Values {
    fn empty(value_type: ValueType) -> Self {
        match value_type {
            ValueType::String => Values::String(Vec::new()),
            ValueType::Bytes => Values::Bytes(Vec::new()),
            ValueType::Integer => Values::Integer(Vec::new()),
            ValueType::Double => Values::Double(Vec::new()),
            ValueType::Bool => Values::Bool(Vec::new()),
        }
    }
}

/// A named, typed, multi-valued message attribute.
///
/// The value type is fixed at construction; appending a mismatched value
/// fails and leaves the field unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    format: ValueFormat,
    values: Values,
}

impl Field {
    /// Create a field typed by its first value.
    pub fn new(name: impl Into<String>, value: FieldValue, format: ValueFormat) -> Self {
        let values = match value {
            FieldValue::String(v) => Values::String(vec![v]),
            FieldValue::Bytes(v) => Values::Bytes(vec![v]),
            FieldValue::Integer(v) => Values::Integer(vec![v]),
            FieldValue::Double(v) => Values::Double(vec![v]),
            FieldValue::Bool(v) => Values::Bool(vec![v]),
        };
        Self {
            name: name.into(),
            format,
            values,
        }
    }

    /// Create an empty field with a declared value type but no values yet.
    pub fn with_value_type(
        name: impl Into<String>,
        value_type: ValueType,
        format: ValueFormat,
    ) -> Self {
        Self {
            name: name.into(),
            format,
            values: Values::empty(value_type),
        }
    }

    /// The field's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field's representation hint.
    pub fn format(&self) -> ValueFormat {
        self.format
    }

    /// The field's declared value type.
    pub fn value_type(&self) -> ValueType {
        match &self.values {
            Values::String(_) => ValueType::String,
            Values::Bytes(_) => ValueType::Bytes,
            Values::Integer(_) => ValueType::Integer,
            Values::Double(_) => ValueType::Double,
            Values::Bool(_) => ValueType::Bool,
        }
    }

    /// Append a value of the field's declared type.
    ///
    /// A mismatched value is rejected with [`FieldError::TypeMismatch`]
    /// and the field is left exactly as it was.
    pub fn add_value(&mut self, value: FieldValue) -> Result<(), FieldError> {
        match (&mut self.values, value) {
            (Values::String(values), FieldValue::String(v)) => values.push(v),
            (Values::Bytes(values), FieldValue::Bytes(v)) => values.push(v),
            (Values::Integer(values), FieldValue::Integer(v)) => values.push(v),
            (Values::Double(values), FieldValue::Double(v)) => values.push(v),
            (Values::Bool(values), FieldValue::Bool(v)) => values.push(v),
            (_, value) => {
                return Err(FieldError::TypeMismatch {
                    name: self.name.clone(),
                    expected: self.value_type(),
                    actual: value.value_type(),
                });
            }
        }
        Ok(())
    }

    /// Number of values in the field.
    pub fn len(&self) -> usize {
        match &self.values {
            Values::String(v) => v.len(),
            Values::Bytes(v) => v.len(),
            Values::Integer(v) => v.len(),
            Values::Double(v) => v.len(),
            Values::Bool(v) => v.len(),
        }
    }

    /// Whether the field holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first value, if any.
    pub fn first(&self) -> Option<FieldValue> {
        match &self.values {
            Values::String(v) => v.first().cloned().map(FieldValue::String),
            Values::Bytes(v) => v.first().cloned().map(FieldValue::Bytes),
            Values::Integer(v) => v.first().copied().map(FieldValue::Integer),
            Values::Double(v) => v.first().copied().map(FieldValue::Double),
            Values::Bool(v) => v.first().copied().map(FieldValue::Bool),
        }
    }

    /// The string values, if this is a STRING field.
    pub fn as_strings(&self) -> Option<&[String]> {
        match &self.values {
            Values::String(v) => Some(v),
            _ => None,
        }
    }

    /// The byte-sequence values, if this is a BYTES field.
    pub fn as_bytes(&self) -> Option<&[Vec<u8>]> {
        match &self.values {
            Values::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// The integer values, if this is an INTEGER field.
    pub fn as_integers(&self) -> Option<&[i64]> {
        match &self.values {
            Values::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// The double values, if this is a DOUBLE field.
    pub fn as_doubles(&self) -> Option<&[f64]> {
        match &self.values {
            Values::Double(v) => Some(v),
            _ => None,
        }
    }

    /// The boolean values, if this is a BOOL field.
    pub fn as_bools(&self) -> Option<&[bool]> {
        match &self.values {
            Values::Bool(v) => Some(v),
            _ => None,
        }
    }
}

/// The structured event record flowing through the pipeline.
///
/// Every scalar attribute may be absent, which is distinct from holding a
/// zero value. Equality compares every attribute including the identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    uuid: Option<Uuid>,
    timestamp: Option<i64>,
    message_type: Option<String>,
    logger: Option<String>,
    severity: Option<i32>,
    payload: Option<String>,
    env_version: Option<String>,
    pid: Option<i32>,
    hostname: Option<String>,
    fields: Vec<Field>,
}

impl Message {
    /// The 16-byte opaque identifier, if set.
    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// Set the identifier.
    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid = Some(uuid);
    }

    /// Nanosecond-resolution Unix timestamp, if set.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Set the timestamp in nanoseconds.
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = Some(timestamp);
    }

    /// The type tag, if set.
    pub fn message_type(&self) -> Option<&str> {
        self.message_type.as_deref()
    }

    /// Set the type tag.
    pub fn set_message_type(&mut self, message_type: impl Into<String>) {
        self.message_type = Some(message_type.into());
    }

    /// The logger (source) name, if set.
    pub fn logger(&self) -> Option<&str> {
        self.logger.as_deref()
    }

    /// Set the logger name.
    pub fn set_logger(&mut self, logger: impl Into<String>) {
        self.logger = Some(logger.into());
    }

    /// The numeric severity, if set.
    pub fn severity(&self) -> Option<i32> {
        self.severity
    }

    /// Set the severity.
    pub fn set_severity(&mut self, severity: i32) {
        self.severity = Some(severity);
    }

    /// The payload string, if set.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Set the payload.
    pub fn set_payload(&mut self, payload: impl Into<String>) {
        self.payload = Some(payload.into());
    }

    /// The environment-version string, if set.
    pub fn env_version(&self) -> Option<&str> {
        self.env_version.as_deref()
    }

    /// Set the environment version.
    pub fn set_env_version(&mut self, env_version: impl Into<String>) {
        self.env_version = Some(env_version.into());
    }

    /// The originating process id, if set.
    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Set the originating process id.
    pub fn set_pid(&mut self, pid: i32) {
        self.pid = Some(pid);
    }

    /// The originating hostname, if set.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Set the hostname.
    pub fn set_hostname(&mut self, hostname: impl Into<String>) {
        self.hostname = Some(hostname.into());
    }

    /// The ordered field sequence.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Append a field. Recurring names are allowed.
    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// The first field with the given name, if any.
    pub fn find_first_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// All fields with the given name, in insertion order.
    pub fn find_all_fields(&self, name: &str) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.name() == name).collect()
    }

    /// The first value of the first field with the given name.
    pub fn field_value(&self, name: &str) -> Option<FieldValue> {
        self.find_first_field(name).and_then(Field::first)
    }

    /// Reset every attribute to absent and drop all fields.
    pub fn clear(&mut self) {
        *self = Message::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_message_has_no_attributes() {
        let msg = Message::default();
        assert_eq!(msg.uuid(), None);
        assert_eq!(msg.timestamp(), None);
        assert_eq!(msg.message_type(), None);
        assert_eq!(msg.logger(), None);
        assert_eq!(msg.severity(), None);
        assert_eq!(msg.payload(), None);
        assert_eq!(msg.env_version(), None);
        assert_eq!(msg.pid(), None);
        assert_eq!(msg.hostname(), None);
        assert!(msg.fields().is_empty());
    }

    #[test]
    fn absent_is_distinct_from_zero() {
        let absent = Message::default();
        let mut zeroed = Message::default();
        zeroed.set_severity(0);
        zeroed.set_pid(0);
        zeroed.set_payload("");

        assert_ne!(absent, zeroed);
        assert_eq!(zeroed.severity(), Some(0));
        assert_eq!(zeroed.payload(), Some(""));
    }

    #[test]
    fn field_append_matching_type() {
        let mut field = Field::new("rate", FieldValue::Double(0.1), ValueFormat::Raw);
        field.add_value(FieldValue::Double(0.2)).unwrap();
        field.add_value(FieldValue::Double(0.3)).unwrap();

        assert_eq!(field.len(), 3);
        assert_eq!(field.as_doubles(), Some(&[0.1, 0.2, 0.3][..]));
    }

    #[test]
    fn field_append_mismatch_leaves_field_unchanged() {
        // Every (declared, appended) pair of distinct types must fail and
        // leave the field exactly as it was.
        let samples = [
            FieldValue::String("s".to_string()),
            FieldValue::Bytes(vec![1, 2]),
            FieldValue::Integer(7),
            FieldValue::Double(7.5),
            FieldValue::Bool(true),
        ];

        for declared in &samples {
            for appended in &samples {
                if declared.value_type() == appended.value_type() {
                    continue;
                }
                let mut field = Field::new("f", declared.clone(), ValueFormat::Raw);
                let before = field.clone();

                let err = field.add_value(appended.clone()).unwrap_err();
                assert_eq!(
                    err,
                    FieldError::TypeMismatch {
                        name: "f".to_string(),
                        expected: declared.value_type(),
                        actual: appended.value_type(),
                    }
                );
                assert_eq!(field, before, "failed append must not mutate the field");
            }
        }
    }

    #[test]
    fn empty_field_keeps_declared_type() {
        let mut field = Field::with_value_type("tags", ValueType::String, ValueFormat::Raw);
        assert!(field.is_empty());
        assert_eq!(field.value_type(), ValueType::String);

        assert!(field.add_value(FieldValue::Integer(1)).is_err());
        field.add_value(FieldValue::String("a".to_string())).unwrap();
        assert_eq!(field.len(), 1);
    }

    #[test]
    fn recurring_field_names() {
        let mut msg = Message::default();
        msg.add_field(Field::new("k", FieldValue::Integer(1), ValueFormat::Raw));
        msg.add_field(Field::new("other", FieldValue::Bool(true), ValueFormat::Raw));
        msg.add_field(Field::new("k", FieldValue::Integer(2), ValueFormat::Raw));

        let all = msg.find_all_fields("k");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].as_integers(), Some(&[1][..]));
        assert_eq!(all[1].as_integers(), Some(&[2][..]));

        // find_first_field returns the first occurrence
        assert_eq!(
            msg.field_value("k"),
            Some(FieldValue::Integer(1)),
            "field_value must read the first field with the name"
        );
    }

    #[test]
    fn field_value_missing_name() {
        let msg = Message::default();
        assert_eq!(msg.field_value("nope"), None);
    }

    #[test]
    fn message_equality_includes_identifier() {
        let mut a = Message::default();
        a.set_message_type("t");
        let mut b = a.clone();
        assert_eq!(a, b);

        a.set_uuid(Uuid::new_v4());
        b.set_uuid(Uuid::new_v4());
        assert_ne!(a, b);

        let mut c = a.clone();
        c.clear();
        assert_eq!(c, Message::default());
    }
}
