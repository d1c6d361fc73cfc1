//! Identity Map pattern for tracking unique entity instances per primary key.
//!
//! The identity map ensures that each row corresponds to exactly one
//! managed handle within a session: two lookups of the same identity return
//! handles sharing one `Arc`, so changes made through either are visible
//! through both.
//!
//! Entries are type-erased behind [`ManagedEntity`] and recovered with a
//! downcast. Keys hash the primary-key values structurally, so composite
//! identifiers compare component by component.

use crate::proxy::{EntityCell, EntityRef, ManagedEntity};
use lazyorm_core::{Model, Value};
use std::any::TypeId;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Hash a slice of values for use as a primary key hash.
///
/// `Int` and `BigInt` hash alike so a key read back from a foreign-key
/// column finds the entity registered under its own id type.
pub(crate) fn hash_values(values: &[Value]) -> u64 {
    use std::collections::hash_map::DefaultHasher;

    let mut hasher = DefaultHasher::new();
    for v in values {
        hash_value(v, &mut hasher);
    }
    hasher.finish()
}

fn hash_value<H: Hasher>(v: &Value, hasher: &mut H) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i64::from(*i).hash(hasher);
        }
        Value::BigInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Text(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            5u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Json(j) => {
            6u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}

/// Value equality with integer widths unified.
pub(crate) fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) if !matches!(a, Value::Bool(_)) && !matches!(b, Value::Bool(_)) => {
            x == y
        }
        _ => a == b,
    }
}

/// Primary-key values compared the way they hash.
///
/// Integer widths are unified and doubles compare by bit pattern, so two
/// keys are equal exactly when a store would treat them as the same row.
#[derive(Debug, Clone)]
pub(crate) struct KeyValues(Vec<Value>);

impl KeyValues {
    pub(crate) fn new(pk: &[Value]) -> Self {
        Self(pk.to_vec())
    }
}

fn key_value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::BigInt(_), Value::Int(_) | Value::BigInt(_)) => {
            a.as_i64() == b.as_i64()
        }
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

impl PartialEq for KeyValues {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().zip(&other.0).all(|(a, b)| key_value_eq(a, b))
    }
}

impl Eq for KeyValues {}

impl Hash for KeyValues {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for v in &self.0 {
            hash_value(v, state);
        }
    }
}

/// Unique key for an entity in the identity map.
///
/// Keys compare the primary-key values themselves, so distinct identities
/// never share an entry even when their hashes collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Type identifier for the Model type.
    type_id: TypeId,
    /// Primary key value(s).
    pk: KeyValues,
}

impl ObjectKey {
    /// Create an object key from type and primary key.
    pub fn from_pk<M: Model>(pk: &[Value]) -> Self {
        Self::new(TypeId::of::<M>(), pk)
    }

    /// Create an object key from an erased type and primary key.
    pub fn new(type_id: TypeId, pk: &[Value]) -> Self {
        Self {
            type_id,
            pk: KeyValues::new(pk),
        }
    }

    /// Get the primary key hash.
    pub fn pk_hash(&self) -> u64 {
        hash_values(&self.pk.0)
    }
}

struct IdentityEntry {
    seq: u64,
    entity: Arc<dyn ManagedEntity>,
}

/// Session-scoped map from identity to managed handle.
#[derive(Default)]
pub(crate) struct IdentityMap {
    entries: HashMap<ObjectKey, IdentityEntry>,
    next_seq: u64,
}

impl IdentityMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn insert(&mut self, key: ObjectKey, entity: Arc<dyn ManagedEntity>) {
        self.next_seq += 1;
        tracing::trace!(
            entity = entity.entity_name(),
            pk_hash = key.pk_hash(),
            "identity map insert"
        );
        self.entries.insert(
            key,
            IdentityEntry {
                seq: self.next_seq,
                entity,
            },
        );
    }

    pub(crate) fn get(&self, key: &ObjectKey) -> Option<&Arc<dyn ManagedEntity>> {
        self.entries.get(key).map(|e| &e.entity)
    }

    /// Typed lookup.
    pub(crate) fn get_typed<M: Model>(&self, pk: &[Value]) -> Option<EntityRef<M>> {
        let entity = self.get(&ObjectKey::from_pk::<M>(pk))?;
        let cell = Arc::clone(entity).into_any().downcast::<EntityCell<M>>().ok()?;
        tracing::trace!(entity = M::entity_name(), "identity map hit");
        Some(EntityRef::from_cell(cell))
    }

    /// Is this exact handle (not merely its identity) managed here?
    pub(crate) fn contains_handle<M: Model>(&self, handle: &EntityRef<M>) -> bool {
        self.get_typed::<M>(handle.id_values())
            .is_some_and(|managed| EntityRef::ptr_eq(&managed, handle))
    }

    pub(crate) fn remove(&mut self, key: &ObjectKey) -> Option<Arc<dyn ManagedEntity>> {
        self.entries.remove(key).map(|e| e.entity)
    }

    /// All entries in the order they entered the session.
    pub(crate) fn ordered(&self) -> Vec<Arc<dyn ManagedEntity>> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| Arc::clone(&e.entity)).collect()
    }

    /// Managed handles of one entity type, in insertion order.
    pub(crate) fn of_type<M: Model>(&self) -> Vec<EntityRef<M>> {
        self.ordered()
            .into_iter()
            .filter_map(|e| e.into_any().downcast::<EntityCell<M>>().ok())
            .map(EntityRef::from_cell)
            .collect()
    }

    /// Remove and return every entry.
    pub(crate) fn drain(&mut self) -> Vec<Arc<dyn ManagedEntity>> {
        let entities = self.ordered();
        self.entries.clear();
        entities
    }
}
