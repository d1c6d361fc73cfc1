//! Core types and traits for lazyorm.
//!
//! This crate provides the foundational abstractions shared by the session
//! and the stores:
//!
//! - `Model` trait for entity-to-row mapping, with `Identifier` for scalar
//!   and composite keys and `MappedSuperclass` for inherited state
//! - `FieldInfo` and `RelationshipInfo` static metadata
//! - `Store` trait, the seam between a session and its backing storage
//! - `Error` and `Result`

pub mod error;
pub mod field;
pub mod model;
pub mod relationship;
pub mod row;
pub mod store;
pub mod types;
pub mod validate;
pub mod value;

pub use error::{
    ConfigError, Error, Result, SchemaError, SchemaErrorKind, SessionError, SessionErrorKind,
    StoreError, StoreErrorKind, TransactionError, TransactionErrorKind, TypeError,
};
pub use field::FieldInfo;
pub use model::{Identifier, MappedSuperclass, Model, copy_model, id_values, inherit_fields};
pub use relationship::{
    Lazy, RelationshipInfo, RelationshipKind, find_relationship, orphan_removal_relationships,
};
pub use row::{ColumnInfo, Row};
pub use store::{Store, StoreOp, TableSchema, VersionCheck};
pub use types::{SqlType, TypeInfo};
pub use validate::{is_valid_identifier, validate_model};
pub use value::Value;
