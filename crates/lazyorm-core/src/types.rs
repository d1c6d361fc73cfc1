//! Column type definitions and mapping.

use crate::value::Value;

/// Column types understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    // Integer types
    Integer,
    BigInt,

    // Floating point
    Double,

    // Boolean
    Boolean,

    // String types
    VarChar(u32),
    Text,

    // Binary
    Blob,

    // JSON
    Json,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::VarChar(len) => format!("VARCHAR({})", len),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Json => "JSON".to_string(),
        }
    }

    /// Whether a non-NULL `value` can be stored in a column of this type.
    ///
    /// Integer widths are interchangeable; VARCHAR enforces its length in
    /// characters.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (SqlType::Integer | SqlType::BigInt, Value::Int(_) | Value::BigInt(_)) => true,
            (SqlType::Double, Value::Double(_) | Value::Int(_)) => true,
            (SqlType::Boolean, Value::Bool(_)) => true,
            (SqlType::VarChar(len), Value::Text(s)) => s.chars().count() <= *len as usize,
            (SqlType::Text, Value::Text(_)) => true,
            (SqlType::Blob, Value::Bytes(_)) => true,
            (SqlType::Json, Value::Json(_) | Value::Text(_)) => true,
            _ => false,
        }
    }
}

/// Trait for types that have a corresponding column type.
pub trait TypeInfo {
    /// The SQL type for this Rust type.
    const SQL_TYPE: SqlType;

    /// Whether this type is nullable by default.
    const NULLABLE: bool = false;
}

impl TypeInfo for i32 {
    const SQL_TYPE: SqlType = SqlType::Integer;
}

impl TypeInfo for i64 {
    const SQL_TYPE: SqlType = SqlType::BigInt;
}

impl TypeInfo for f64 {
    const SQL_TYPE: SqlType = SqlType::Double;
}

impl TypeInfo for bool {
    const SQL_TYPE: SqlType = SqlType::Boolean;
}

impl TypeInfo for String {
    const SQL_TYPE: SqlType = SqlType::Text;
}

impl TypeInfo for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::Blob;
}

impl TypeInfo for serde_json::Value {
    const SQL_TYPE: SqlType = SqlType::Json;
}

impl<T: TypeInfo> TypeInfo for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_checks_shape_and_length() {
        assert!(SqlType::Integer.accepts(&Value::BigInt(4)));
        assert!(SqlType::Text.accepts(&Value::Null));
        assert!(!SqlType::Boolean.accepts(&Value::Int(1)));
        assert!(SqlType::VarChar(3).accepts(&Value::from("abc")));
        assert!(!SqlType::VarChar(3).accepts(&Value::from("abcd")));
    }

    #[test]
    fn option_is_nullable() {
        assert!(<Option<i32> as TypeInfo>::NULLABLE);
        assert!(!<i32 as TypeInfo>::NULLABLE);
        assert_eq!(<Option<String> as TypeInfo>::SQL_TYPE, SqlType::Text);
    }
}
