//! lazyorm - persistence sessions with lazy references, inline dirty
//! tracking and merge semantics.
//!
//! lazyorm maps plain Rust structs to store rows and manages them through a
//! [`Session`]:
//!
//! - Lazy references that load their row on first access
//! - Column-level dirty tracking, inline or by snapshot
//! - Merging detached state onto managed instances
//! - Composite identifiers, including keys inherited from a mapped superclass
//! - Orphan removal for owned one-to-one associations
//! - Atomic flush ordered by foreign key dependencies
//!
//! # Quick Start
//!
//! ```ignore
//! use lazyorm::prelude::*;
//!
//! let factory = SessionFactory::builder()
//!     .config(OrmConfig::from_env()?)
//!     .register::<Animal>()
//!     .build()?;
//!
//! factory.in_transaction(|session| {
//!     session.persist(Animal::new("Ella", 3))?;
//!     Ok(())
//! })?;
//!
//! factory.in_transaction(|session| {
//!     let ella = session.get_reference::<Animal>(&"Ella".to_string())?;
//!     assert!(!is_initialized(&ella));
//!     ella.set("color", "grey")?; // loads, then writes
//!     Ok(())
//! })?;
//! ```
//!
//! # Crates
//!
//! - `lazyorm-core`: values, rows, entity mapping, the store seam, errors
//! - `lazyorm-session`: identity map, handles, dirty tracking, flush
//! - `lazyorm-memory`: in-memory store with referential integrity

pub mod config;
pub mod factory;

pub use config::OrmConfig;
pub use factory::{SchemaManager, SessionFactory, SessionFactoryBuilder};

pub use lazyorm_core::{
    ColumnInfo, Error, FieldInfo, Identifier, Lazy, MappedSuperclass, Model, RelationshipInfo,
    RelationshipKind, Result, Row, SqlType, Store, StoreOp, TableSchema, TypeInfo, Value,
    VersionCheck, inherit_fields,
};
pub use lazyorm_core::error;
pub use lazyorm_memory::MemoryStore;
pub use lazyorm_session::{
    DirtyTracking, EntityRef, EntityRegistry, EntityStatus, FlushResult, Session, SessionConfig,
    SessionState, Statistics, StatisticsSnapshot,
};

/// Has the handle's row been loaded?
///
/// The free-function form of [`EntityRef::is_initialized`].
pub fn is_initialized<M: Model>(entity: &EntityRef<M>) -> bool {
    entity.is_initialized()
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use lazyorm::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        DirtyTracking, EntityRef, EntityStatus, Error, FieldInfo, Identifier, Lazy,
        MappedSuperclass, Model, OrmConfig, RelationshipInfo, RelationshipKind, Result, Row,
        Session, SessionFactory, SqlType, Value, inherit_fields, is_initialized,
    };
}
