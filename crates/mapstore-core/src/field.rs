//! Field and column metadata.

use crate::value::Value;

/// The declared storage type of a mapped field.
///
/// Determines the zero value used for primary-key bookkeeping: a primary
/// key whose current value equals its type's zero value selects the create
/// path on save and is rejected by delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Boolean column
    Bool,
    /// 64-bit integer column
    Int,
    /// 64-bit floating point column
    Float,
    /// Text column
    Text,
    /// Binary column
    Bytes,
    /// JSON document column
    Json,
}

impl FieldType {
    /// The zero value for this type.
    #[must_use]
    pub const fn zero_value(&self) -> Value {
        match self {
            FieldType::Bool => Value::Bool(false),
            FieldType::Int => Value::Int(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Text => Value::Text(String::new()),
            FieldType::Bytes => Value::Bytes(Vec::new()),
            FieldType::Json => Value::Json(serde_json::Value::Null),
        }
    }
}

/// Metadata about one mapped entity field.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Backend column name (may differ from the field name)
    pub column_name: &'static str,
    /// Declared storage type
    pub field_type: FieldType,
    /// Whether this field is the primary key
    pub primary_key: bool,
    /// Whether the field is dropped from written records while its value
    /// is the zero value (lets the backend assign identifiers/defaults)
    pub omit_when_zero: bool,
}

impl FieldInfo {
    /// Create a new field descriptor with no options set.
    pub const fn new(name: &'static str, column_name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            column_name,
            field_type,
            primary_key: false,
            omit_when_zero: false,
        }
    }

    /// Set the primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Set the omit-when-zero flag.
    pub const fn omit_when_zero(mut self, value: bool) -> Self {
        self.omit_when_zero = value;
        self
    }

    /// Whether `value` is the zero value for this field's type.
    ///
    /// Null counts as zero regardless of the declared type.
    pub fn is_zero_value(&self, value: &Value) -> bool {
        value.is_null() || *value == self.field_type.zero_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_flags() {
        const FIELD: FieldInfo =
            FieldInfo::new("id", "id", FieldType::Int).primary_key(true).omit_when_zero(true);
        assert!(FIELD.primary_key);
        assert!(FIELD.omit_when_zero);
        assert_eq!(FIELD.column_name, "id");
    }

    #[test]
    fn test_zero_value_per_type() {
        assert_eq!(FieldType::Int.zero_value(), Value::Int(0));
        assert_eq!(FieldType::Text.zero_value(), Value::Text(String::new()));
        assert_eq!(FieldType::Bool.zero_value(), Value::Bool(false));
    }

    #[test]
    fn test_is_zero_value() {
        let field = FieldInfo::new("id", "id", FieldType::Int).primary_key(true);
        assert!(field.is_zero_value(&Value::Int(0)));
        assert!(field.is_zero_value(&Value::Null));
        assert!(!field.is_zero_value(&Value::Int(12)));
        // A zero of a different type is not this field's zero.
        assert!(!field.is_zero_value(&Value::Text(String::new())));
    }
}
