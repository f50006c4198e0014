//! Core type definitions for the catalog.

use quarry_proto::Value;
use serde::{Deserialize, Serialize};

/// Scalar data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
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

/// Field types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// A scalar value.
    Scalar(ScalarType),
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

    /// Check if this type is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Int64)
    }

    /// Coerce a non-null literal to this type.
    ///
    /// Integers widen, integers and doubles narrow to floats, integers become
    /// timestamps and hyphenated strings become UUIDs. Anything else is a
    /// mismatch described by the returned message.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        let coerced = match (self, value) {
            (ScalarType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
            (ScalarType::Int32, Value::Int32(i)) => Some(Value::Int32(*i)),
            (ScalarType::Int32, Value::Int64(i)) => i32::try_from(*i).ok().map(Value::Int32),
            (ScalarType::Int64, Value::Int32(i)) => Some(Value::Int64(i64::from(*i))),
            (ScalarType::Int64, Value::Int64(i)) => Some(Value::Int64(*i)),
            (ScalarType::Float32, v) => v.as_f64().map(|f| Value::Float32(f as f32)),
            (ScalarType::Float64, v) => v.as_f64().map(Value::Float64),
            (ScalarType::String, Value::String(s)) => Some(Value::String(s.clone())),
            (ScalarType::Bytes, Value::Bytes(b)) => Some(Value::Bytes(b.clone())),
            (ScalarType::Timestamp, Value::Timestamp(t)) => Some(Value::Timestamp(*t)),
            (ScalarType::Timestamp, Value::Int32(_) | Value::Int64(_)) => {
                value.as_i64().map(Value::Timestamp)
            }
            (ScalarType::Uuid, Value::Uuid(u)) => Some(Value::Uuid(*u)),
            (ScalarType::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s)
                .ok()
                .map(|u| Value::Uuid(*u.as_bytes())),
            _ => None,
        };

        coerced.ok_or_else(|| format!("expected {}, got {} ({value})", self.name(), value.type_name()))
    }

    /// Lowercase type name.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float32 => "float32",
            ScalarType::Float64 => "float64",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Uuid => "uuid",
        }
    }
}

impl FieldType {
    /// Create a scalar field type.
    pub fn scalar(scalar: ScalarType) -> Self {
        FieldType::Scalar(scalar)
    }

    /// Create an enum field type.
    pub fn enum_type<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldType::Enum {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    /// Get the inner scalar type if this is a scalar.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            FieldType::Scalar(s) => Some(*s),
            FieldType::Enum { .. } => None,
        }
    }

    /// Check if values of this type are strings (plain strings or enums).
    pub fn is_string_like(&self) -> bool {
        matches!(self, FieldType::Scalar(ScalarType::String) | FieldType::Enum { .. })
    }

    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        self.scalar_type().is_some_and(|s| s.is_numeric())
    }

    /// Check if values of this type have a meaningful order.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, FieldType::Scalar(ScalarType::Bool))
    }

    /// Coerce a non-null literal to this type.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        match self {
            FieldType::Scalar(scalar) => scalar.coerce(value),
            FieldType::Enum { name, variants } => match value {
                Value::String(s) if variants.iter().any(|v| v == s) => Ok(value.clone()),
                Value::String(s) => Err(format!("'{s}' is not a variant of enum {name}")),
                other => Err(format!("expected enum {name}, got {}", other.type_name())),
            },
        }
    }

    /// Check if this type and another hold comparable key values.
    pub fn is_key_compatible(&self, other: &FieldType) -> bool {
        match (self.scalar_type(), other.scalar_type()) {
            (Some(a), Some(b)) => a == b || (a.is_integer() && b.is_integer()),
            _ => self == other,
        }
    }

    /// Type name used in error messages.
    pub fn name(&self) -> String {
        match self {
            FieldType::Scalar(s) => s.name().to_string(),
            FieldType::Enum { name, .. } => format!("enum {name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_type_checks() {
        assert!(ScalarType::Int32.is_numeric());
        assert!(ScalarType::Float64.is_numeric());
        assert!(!ScalarType::String.is_numeric());
        assert!(!ScalarType::Bool.is_numeric());
        assert!(ScalarType::Int64.is_integer());
        assert!(!ScalarType::Float32.is_integer());
    }

    #[test]
    fn test_coerce_numbers() {
        assert_eq!(ScalarType::Int64.coerce(&Value::Int32(5)), Ok(Value::Int64(5)));
        assert_eq!(ScalarType::Int32.coerce(&Value::Int64(5)), Ok(Value::Int32(5)));
        assert!(ScalarType::Int32.coerce(&Value::Int64(i64::MAX)).is_err());
        assert_eq!(ScalarType::Float64.coerce(&Value::Int32(2)), Ok(Value::Float64(2.0)));
        assert_eq!(ScalarType::Timestamp.coerce(&Value::Int64(9)), Ok(Value::Timestamp(9)));
        assert!(ScalarType::Int32.coerce(&Value::Float64(1.5)).is_err());
        assert!(ScalarType::Bool.coerce(&Value::Int32(1)).is_err());
    }

    #[test]
    fn test_coerce_uuid_from_string() {
        let parsed = ScalarType::Uuid
            .coerce(&Value::String("00000000-0000-0000-0000-000000000001".into()))
            .unwrap();
        let mut expected = [0u8; 16];
        expected[15] = 1;
        assert_eq!(parsed, Value::Uuid(expected));

        assert!(ScalarType::Uuid.coerce(&Value::String("nope".into())).is_err());
    }

    #[test]
    fn test_enum_type() {
        let status = FieldType::enum_type("Status", ["Active", "Inactive"]);

        assert!(status.is_string_like());
        assert!(status.coerce(&Value::String("Active".into())).is_ok());
        assert!(status.coerce(&Value::String("Deleted".into())).is_err());
        assert!(status.coerce(&Value::Int32(0)).is_err());
    }

    #[test]
    fn test_key_compatibility() {
        let int32 = FieldType::scalar(ScalarType::Int32);
        let int64 = FieldType::scalar(ScalarType::Int64);
        let uuid = FieldType::scalar(ScalarType::Uuid);

        assert!(int32.is_key_compatible(&int64));
        assert!(uuid.is_key_compatible(&uuid));
        assert!(!uuid.is_key_compatible(&int64));
    }

    #[test]
    fn test_field_type_json() {
        let json = r#"{ "enum": { "name": "Role", "variants": ["admin", "member"] } }"#;
        let parsed: FieldType = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, FieldType::enum_type("Role", ["admin", "member"]));

        let scalar: FieldType = serde_json::from_str(r#"{ "scalar": "uuid" }"#).unwrap();
        assert_eq!(scalar, FieldType::scalar(ScalarType::Uuid));
    }
}
