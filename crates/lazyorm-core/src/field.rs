//! Field and column definitions.

use crate::types::{SqlType, TypeInfo};

/// Metadata about a model field/column.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// Rust field name
    pub name: &'static str,
    /// Database column name (may differ from field name)
    pub column_name: &'static str,
    /// SQL type for this field
    pub sql_type: SqlType,
    /// Whether this field is nullable
    pub nullable: bool,
    /// Whether this is a (possibly partial) primary key
    pub primary_key: bool,
    /// Whether this column carries the optimistic-lock version
    pub version: bool,
    /// Foreign key reference (table.column)
    pub foreign_key: Option<&'static str>,
}

impl FieldInfo {
    /// Create a new field info with minimal required data.
    pub const fn new(name: &'static str, column_name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            column_name,
            sql_type,
            nullable: false,
            primary_key: false,
            version: false,
            foreign_key: None,
        }
    }

    /// Create a field whose column type and nullability come from the Rust type.
    pub const fn of<T: TypeInfo>(name: &'static str) -> Self {
        Self::new(name, name, T::SQL_TYPE).nullable(T::NULLABLE)
    }

    /// Set the database column name.
    pub const fn column(mut self, name: &'static str) -> Self {
        self.column_name = name;
        self
    }

    /// Set nullable flag.
    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set primary key flag.
    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Mark this column as the version counter.
    pub const fn version(mut self, value: bool) -> Self {
        self.version = value;
        self
    }

    /// Set foreign key reference.
    pub const fn foreign_key(mut self, reference: &'static str) -> Self {
        self.foreign_key = Some(reference);
        self
    }

    /// Split the foreign key reference into `(table, column)`.
    pub fn foreign_key_target(&self) -> Option<(&'static str, &'static str)> {
        self.foreign_key.and_then(|r| r.split_once('.'))
    }
}
