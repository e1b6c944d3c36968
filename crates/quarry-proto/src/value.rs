//! Runtime value types for conditions, parameters and records.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// A runtime value bound into queries or read back from a backend.
///
/// Arrays are typed (e.g., BoolArray, Int64Array) so the enum stays
/// non-recursive for rkyv.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit floating point.
    Float32(f32),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Timestamp as microseconds since Unix epoch.
    Timestamp(i64),
    /// UUID as 16 bytes.
    Uuid([u8; 16]),
    /// Array of booleans.
    BoolArray(Vec<bool>),
    /// Array of 32-bit integers.
    Int32Array(Vec<i32>),
    /// Array of 64-bit integers.
    Int64Array(Vec<i64>),
    /// Array of 32-bit floats.
    Float32Array(Vec<f32>),
    /// Array of 64-bit floats.
    Float64Array(Vec<f64>),
    /// Array of strings.
    StringArray(Vec<String>),
    /// Array of UUIDs.
    UuidArray(Vec<[u8; 16]>),
}

/// Hashable identity of a scalar value.
///
/// Used to index records by primary and foreign keys. Integer widths collapse
/// so an `Int32` foreign key matches an `Int64` primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    Bool(bool),
    Int(i64),
    String(String),
    Bytes(Vec<u8>),
    Uuid([u8; 16]),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value counts as "empty" for condition compilation.
    ///
    /// Null and the empty string are empty; everything else, including `0`,
    /// `false` and empty arrays, is not.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Check if this value is an array type.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Value::BoolArray(_)
                | Value::Int32Array(_)
                | Value::Int64Array(_)
                | Value::Float32Array(_)
                | Value::Float64Array(_)
                | Value::StringArray(_)
                | Value::UuidArray(_)
        )
    }

    /// Expand a typed array into its element values.
    ///
    /// Returns `None` for scalars.
    pub fn to_list(&self) -> Option<Vec<Value>> {
        let list = match self {
            Value::BoolArray(v) => v.iter().copied().map(Value::Bool).collect(),
            Value::Int32Array(v) => v.iter().copied().map(Value::Int32).collect(),
            Value::Int64Array(v) => v.iter().copied().map(Value::Int64).collect(),
            Value::Float32Array(v) => v.iter().copied().map(Value::Float32).collect(),
            Value::Float64Array(v) => v.iter().copied().map(Value::Float64).collect(),
            Value::StringArray(v) => v.iter().cloned().map(Value::String).collect(),
            Value::UuidArray(v) => v.iter().copied().map(Value::Uuid).collect(),
            _ => return None,
        };
        Some(list)
    }

    /// Build a typed array from a homogeneous list of scalars.
    ///
    /// Integers widen to `Int64Array`; mixed integer/float lists become
    /// `Float64Array`. An empty list becomes an empty `StringArray`.
    pub fn from_list(values: &[Value]) -> Result<Value, Error> {
        if values.is_empty() {
            return Ok(Value::StringArray(Vec::new()));
        }
        if values.iter().all(|v| matches!(v, Value::String(_))) {
            return Ok(Value::StringArray(
                values.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
            ));
        }
        if values.iter().all(|v| matches!(v, Value::Bool(_))) {
            return Ok(Value::BoolArray(values.iter().filter_map(Value::as_bool).collect()));
        }
        if values.iter().all(|v| matches!(v, Value::Int32(_) | Value::Int64(_))) {
            return Ok(Value::Int64Array(values.iter().filter_map(Value::as_i64).collect()));
        }
        if values.iter().all(|v| {
            matches!(v, Value::Int32(_) | Value::Int64(_) | Value::Float32(_) | Value::Float64(_))
        }) {
            return Ok(Value::Float64Array(
                values
                    .iter()
                    .filter_map(|v| v.as_f64().or_else(|| v.as_i64().map(|i| i as f64)))
                    .collect(),
            ));
        }
        if values.iter().all(|v| matches!(v, Value::Uuid(_))) {
            return Ok(Value::UuidArray(values.iter().filter_map(|v| v.as_uuid().copied()).collect()));
        }
        Err(Error::InvalidValue(format!("heterogeneous array: {values:?}")))
    }

    /// Hashable key for scalar values. Null, floats and arrays have none.
    pub fn key(&self) -> Option<ValueKey> {
        match self {
            Value::Bool(b) => Some(ValueKey::Bool(*b)),
            Value::Int32(i) => Some(ValueKey::Int(*i as i64)),
            Value::Int64(i) | Value::Timestamp(i) => Some(ValueKey::Int(*i)),
            Value::String(s) => Some(ValueKey::String(s.clone())),
            Value::Bytes(b) => Some(ValueKey::Bytes(b.clone())),
            Value::Uuid(u) => Some(ValueKey::Uuid(*u)),
            _ => None,
        }
    }

    /// Convert a JSON value into a runtime value.
    ///
    /// Integral numbers become `Int64`, other numbers `Float64`; arrays are
    /// converted element-wise into a typed array.
    pub fn from_json(json: &JsonValue) -> Result<Value, Error> {
        match json {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int64(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float64(f))
                } else {
                    Err(Error::InvalidValue(format!("number out of range: {n}")))
                }
            }
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| match item {
                        JsonValue::Array(_) | JsonValue::Object(_) => Err(Error::InvalidValue(
                            format!("nested value inside array: {item}"),
                        )),
                        scalar => Value::from_json(scalar),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Value::from_list(&values)
            }
            JsonValue::Object(_) => Err(Error::InvalidValue(format!("object is not a value: {json}"))),
        }
    }

    /// Convert into a JSON value. UUIDs and bytes are hex-encoded.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::from(*b),
            Value::Int32(i) => JsonValue::from(*i),
            Value::Int64(i) | Value::Timestamp(i) => JsonValue::from(*i),
            Value::Float32(f) => JsonValue::from(*f as f64),
            Value::Float64(f) => JsonValue::from(*f),
            Value::String(s) => JsonValue::from(s.as_str()),
            Value::Bytes(b) => JsonValue::from(hex::encode(b)),
            Value::Uuid(u) => JsonValue::from(hex::encode(u)),
            array => JsonValue::Array(
                array
                    .to_list()
                    .unwrap_or_default()
                    .iter()
                    .map(Value::to_json)
                    .collect(),
            ),
        }
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            Value::Int32(i) => Some(*i as i64),
            _ => None,
        }
    }

    /// Try to get as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            Value::Float32(f) => Some(*f as f64),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as UUID.
    pub fn as_uuid(&self) -> Option<&[u8; 16]> {
        match self {
            Value::Uuid(u) => Some(u),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Int64Array(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::StringArray(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_values() {
        assert!(Value::Null.is_empty());
        assert!(Value::String(String::new()).is_empty());
        assert!(!Value::String(" ".into()).is_empty());
        assert!(!Value::Int64(0).is_empty());
        assert!(!Value::Bool(false).is_empty());
        assert!(!Value::Int64Array(vec![]).is_empty());
    }

    #[test]
    fn test_key_widens_integers() {
        assert_eq!(Value::Int32(5).key(), Value::Int64(5).key());
        assert_eq!(Value::Null.key(), None);
        assert_eq!(Value::Float64(1.5).key(), None);
    }

    #[test]
    fn test_from_json_scalars_and_arrays() {
        assert_eq!(Value::from_json(&json!(null)).unwrap(), Value::Null);
        assert_eq!(Value::from_json(&json!(7)).unwrap(), Value::Int64(7));
        assert_eq!(Value::from_json(&json!(1.5)).unwrap(), Value::Float64(1.5));
        assert_eq!(
            Value::from_json(&json!(["a", "b"])).unwrap(),
            Value::StringArray(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            Value::from_json(&json!([1, 2.5])).unwrap(),
            Value::Float64Array(vec![1.0, 2.5])
        );
        assert!(Value::from_json(&json!({"a": 1})).is_err());
        assert!(Value::from_json(&json!([1, "a"])).is_err());
    }

    #[test]
    fn test_to_list() {
        assert_eq!(
            Value::Int64Array(vec![1, 2]).to_list(),
            Some(vec![Value::Int64(1), Value::Int64(2)])
        );
        assert_eq!(Value::Int64(1).to_list(), None);
    }

    #[test]
    fn test_display_quotes_strings() {
        assert_eq!(Value::from("it's").to_string(), "'it''s'");
        assert_eq!(Value::Int64(5).to_string(), "5");
        assert_eq!(Value::Null.to_string(), "NULL");
    }

    #[test]
    fn test_value_rkyv_roundtrip() {
        let values = vec![
            Value::Null,
            Value::Int64(i64::MAX),
            Value::String("hello world".into()),
            Value::Uuid([7; 16]),
            Value::StringArray(vec!["a".into(), "b".into()]),
        ];

        for value in values {
            let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&value).unwrap();
            let archived = rkyv::access::<ArchivedValue, rkyv::rancor::Error>(&bytes).unwrap();
            let deserialized: Value =
                rkyv::deserialize::<Value, rkyv::rancor::Error>(archived).unwrap();
            assert_eq!(value, deserialized);
        }
    }
}
