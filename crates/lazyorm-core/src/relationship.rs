//! Relationship metadata.
//!
//! Relationships are declared as static metadata on each `Model`. The
//! session reads it at flush time to find owned associations whose
//! dependent row must be removed, and to navigate inverse sides.

use crate::field::FieldInfo;
use crate::{Model, Value};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// The type of relationship between two models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RelationshipKind {
    /// One-to-one: `Car` has one `Engine`.
    OneToOne,
    /// Many-to-one: many `Car`s share one `Garage`.
    #[default]
    ManyToOne,
}

/// Static description of one association field.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipInfo {
    /// Field name on the declaring model.
    pub name: &'static str,

    /// Table of the related model.
    pub related_table: &'static str,

    /// Relationship cardinality.
    pub kind: RelationshipKind,

    /// Foreign-key column on this model (owning side only).
    pub local_key: Option<&'static str>,

    /// Name of the owning relationship on the related model (inverse side only).
    pub mapped_by: Option<&'static str>,

    /// Delete the related row when this association is cleared or replaced.
    pub orphan_removal: bool,

    /// Whether the association is loaded on demand.
    pub lazy: bool,

    /// Function pointer returning the related model's fields metadata.
    pub related_fields_fn: fn() -> &'static [FieldInfo],
}

impl PartialEq for RelationshipInfo {
    fn eq(&self, other: &Self) -> bool {
        // `related_fields_fn` is not part of the identity of a relationship.
        self.name == other.name
            && self.related_table == other.related_table
            && self.kind == other.kind
            && self.local_key == other.local_key
            && self.mapped_by == other.mapped_by
            && self.orphan_removal == other.orphan_removal
            && self.lazy == other.lazy
    }
}

impl Eq for RelationshipInfo {}

impl RelationshipInfo {
    fn empty_related_fields() -> &'static [FieldInfo] {
        &[]
    }

    /// Create a new relationship with required fields.
    #[must_use]
    pub const fn new(
        name: &'static str,
        related_table: &'static str,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            name,
            related_table,
            kind,
            local_key: None,
            mapped_by: None,
            orphan_removal: false,
            lazy: true,
            related_fields_fn: Self::empty_related_fields,
        }
    }

    /// Provide the related model's `Model::fields()` function pointer.
    #[must_use]
    pub const fn related_fields(mut self, f: fn() -> &'static [FieldInfo]) -> Self {
        self.related_fields_fn = f;
        self
    }

    /// Set the local foreign key column (owning side).
    #[must_use]
    pub const fn local_key(mut self, key: &'static str) -> Self {
        self.local_key = Some(key);
        self
    }

    /// Declare this side as the inverse of `field` on the related model.
    #[must_use]
    pub const fn mapped_by(mut self, field: &'static str) -> Self {
        self.mapped_by = Some(field);
        self
    }

    /// Enable orphan removal.
    #[must_use]
    pub const fn orphan_removal(mut self, value: bool) -> Self {
        self.orphan_removal = value;
        self
    }

    /// Set lazy loading flag.
    #[must_use]
    pub const fn lazy(mut self, value: bool) -> Self {
        self.lazy = value;
        self
    }

    /// Is this the side that holds the foreign key?
    #[must_use]
    pub const fn is_owning(&self) -> bool {
        self.local_key.is_some()
    }

    /// Primary-key columns of the related model.
    pub fn related_primary_key(&self) -> Vec<&'static str> {
        (self.related_fields_fn)()
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.column_name)
            .collect()
    }
}

// ============================================================================
// Relationship Lookup Helpers
// ============================================================================

/// Find a relationship by field name in a model's RELATIONSHIPS.
pub fn find_relationship<M: Model>(field_name: &str) -> Option<&'static RelationshipInfo> {
    M::RELATIONSHIPS.iter().find(|r| r.name == field_name)
}

/// Owning relationships of `M` that remove orphans.
pub fn orphan_removal_relationships<M: Model>() -> impl Iterator<Item = &'static RelationshipInfo> {
    M::RELATIONSHIPS
        .iter()
        .filter(|r| r.orphan_removal && r.is_owning())
}

// ============================================================================
// Lazy association holder
// ============================================================================

/// A single-valued association held by foreign key.
///
/// The related entity is never stored inline: the holder carries the key
/// and the session resolves it into a lazy reference on demand, so the
/// related row is only read when the reference is first accessed.
///
/// ```ignore
/// let engine = session.resolve(&car.engine)?; // no load yet
/// let hp = engine.expect("engine set").with(|e| e.horse_power)?; // loads
/// ```
pub struct Lazy<T: Model> {
    fk_value: Option<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Lazy<T> {
    /// Create an empty association (null FK).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            fk_value: None,
            _marker: PhantomData,
        }
    }

    /// Create from a foreign key value.
    ///
    /// A NULL value yields an empty association.
    #[must_use]
    pub fn from_fk(fk: impl Into<Value>) -> Self {
        let fk = fk.into();
        Self {
            fk_value: (!fk.is_null()).then_some(fk),
            _marker: PhantomData,
        }
    }

    /// Check if the association is empty (null FK).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fk_value.is_none()
    }

    /// Get the foreign key value.
    #[must_use]
    pub fn fk(&self) -> Option<&Value> {
        self.fk_value.as_ref()
    }

    /// The foreign key as a column value (NULL when empty).
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.fk_value.clone().unwrap_or(Value::Null)
    }

    /// Point the association at another row.
    pub fn set(&mut self, fk: impl Into<Value>) {
        *self = Self::from_fk(fk);
    }

    /// Clear the association.
    pub fn clear(&mut self) {
        self.fk_value = None;
    }
}

impl<T: Model> Default for Lazy<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Model> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            fk_value: self.fk_value.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Model> PartialEq for Lazy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.fk_value == other.fk_value
    }
}

impl<T: Model> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("table", &T::TABLE_NAME)
            .field("fk_value", &self.fk_value)
            .finish()
    }
}

impl<T: Model> From<Lazy<T>> for Value {
    fn from(lazy: Lazy<T>) -> Self {
        lazy.fk_value.unwrap_or(Value::Null)
    }
}

impl<T: Model> TryFrom<Value> for Lazy<T> {
    type Error = crate::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(Self::from_fk(value))
    }
}

impl<T: Model> Serialize for Lazy<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fk_value.serialize(serializer)
    }
}

impl<'de, T: Model> Deserialize<'de> for Lazy<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fk = Option::<Value>::deserialize(deserializer)?;
        Ok(Self {
            fk_value: fk,
            _marker: PhantomData,
        })
    }
}
