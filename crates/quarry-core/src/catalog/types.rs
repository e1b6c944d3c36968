//! Column type definitions for the catalog.

use serde::{Deserialize, Serialize};

/// Scalar column types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

/// Column types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// A scalar value.
    Scalar(ScalarType),
    /// A nullable scalar value.
    OptionalScalar(ScalarType),
    /// An array of scalar values.
    ArrayScalar(ScalarType),
    /// An enumeration stored as its variant name.
    Enum {
        /// Name of the enum type.
        name: String,
        /// Allowed variant values.
        variants: Vec<String>,
    },
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float32 | ScalarType::Float64
        )
    }
}

impl FieldType {
    /// Create a scalar field type.
    pub fn scalar(scalar: ScalarType) -> Self {
        FieldType::Scalar(scalar)
    }

    /// Create an optional scalar field type.
    pub fn optional_scalar(scalar: ScalarType) -> Self {
        FieldType::OptionalScalar(scalar)
    }

    /// Create an array of scalars field type.
    pub fn array_scalar(scalar: ScalarType) -> Self {
        FieldType::ArrayScalar(scalar)
    }

    /// Check if this type is nullable.
    pub fn is_nullable(&self) -> bool {
        matches!(self, FieldType::OptionalScalar(_))
    }

    /// Check if this type is an array.
    pub fn is_array(&self) -> bool {
        matches!(self, FieldType::ArrayScalar(_))
    }

    /// Short human-readable name, used by `describe`.
    pub fn display_name(&self) -> String {
        match self {
            FieldType::Scalar(s) => format!("{s:?}"),
            FieldType::OptionalScalar(s) => format!("{s:?}?"),
            FieldType::ArrayScalar(s) => format!("[{s:?}]"),
            FieldType::Enum { name, .. } => name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_builders() {
        let int_type = FieldType::scalar(ScalarType::Int32);
        assert!(!int_type.is_nullable());
        assert!(!int_type.is_array());
        assert!(ScalarType::Int32.is_numeric());

        assert!(FieldType::optional_scalar(ScalarType::Int64).is_nullable());
        assert_eq!(FieldType::array_scalar(ScalarType::String).display_name(), "[String]");
    }

    #[test]
    fn test_json_shape() {
        let ty: FieldType = serde_json::from_str(r#"{"optional_scalar": "int64"}"#).unwrap();
        assert_eq!(ty, FieldType::OptionalScalar(ScalarType::Int64));
    }
}
