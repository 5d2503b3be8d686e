//! Field maps: the parsed, handler-facing form of a message body.
//!
//! A message is a nested associative map keyed by field name. Values are a
//! sum over integers, byte sequences, nested maps and sequences of nested
//! maps, preserving the late-bound flexibility of the schema while staying
//! statically typed.

use std::collections::BTreeMap;

use bytes::Bytes;

/// A single field value inside a [`FieldMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Fixed-size integer field, at most 64 bits on the wire.
    ///
    /// `i128` covers the full unsigned and signed 64-bit ranges without a
    /// separate variant per signedness.
    Int(i128),
    /// Raw bytes: opaque blobs, trailing data or C-string contents.
    Bytes(Bytes),
    /// Text for C-string fields, encoded as UTF-8 when formatted.
    Text(String),
    /// A single nested struct.
    Map(FieldMap),
    /// Zero or more repeated struct instances, in wire order.
    List(Vec<FieldMap>),
}

impl Value {
    /// Kind of the value, for error reporting.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Map(_) => "map",
            Value::List(_) => "list",
        }
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Value::Int(i128::from(value))
            }
        })*
    };
}

value_from_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(value: &[u8; N]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<FieldMap> for Value {
    fn from(value: FieldMap) -> Self {
        Value::Map(value)
    }
}

impl From<Vec<FieldMap>> for Value {
    fn from(value: Vec<FieldMap>) -> Self {
        Value::List(value)
    }
}

/// Nested associative representation of a message body.
///
/// Keys are field names from the schema. Fields a handler does not set are
/// formatted as zero/empty of their declared kind, so a reply map only needs
/// the fields the handler cares about. Keys the schema does not know are
/// ignored at format time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap(BTreeMap<String, Value>);

impl FieldMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Builder-style [`Self::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Raw value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Integer value of a field.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i128> {
        match self.get(name) {
            Some(Value::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Integer value of a field, narrowed to `u64`.
    #[must_use]
    pub fn uint(&self, name: &str) -> Option<u64> {
        self.int(name).and_then(|value| u64::try_from(value).ok())
    }

    /// Byte content of a field; text values are seen as their UTF-8 bytes.
    #[must_use]
    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        match self.get(name) {
            Some(Value::Bytes(value)) => Some(value),
            Some(Value::Text(value)) => Some(value.as_bytes()),
            _ => None,
        }
    }

    /// Nested struct value of a field.
    #[must_use]
    pub fn map(&self, name: &str) -> Option<&FieldMap> {
        match self.get(name) {
            Some(Value::Map(value)) => Some(value),
            _ => None,
        }
    }

    /// Repeated struct instances of a field.
    #[must_use]
    pub fn list(&self, name: &str) -> Option<&[FieldMap]> {
        match self.get(name) {
            Some(Value::List(value)) => Some(value),
            _ => None,
        }
    }

    /// Whether the map holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of fields set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}
