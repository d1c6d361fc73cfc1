//! Flush operation ordering.
//!
//! Writes are applied as one batch in this order:
//! - inserts, parents first, so new rows can reference each other
//! - updates, so associations move off rows about to be deleted
//! - deletes, children first, so no deleted row is still referenced

use crate::registry::EntityRegistry;
use crate::unit_of_work::{Orphan, PendingCounts, UnitOfWork};
use lazyorm_core::StoreOp;
use serde::Serialize;

/// Orders a [`UnitOfWork`] by foreign key depth.
///
/// Depth is the length of the longest foreign-key chain from a table,
/// so a table always sorts deeper than every table it references.
#[derive(Debug)]
pub struct FlushOrderer<'a> {
    registry: &'a EntityRegistry,
}

impl<'a> FlushOrderer<'a> {
    /// Create an orderer over the registered tables.
    pub fn new(registry: &'a EntityRegistry) -> Self {
        Self { registry }
    }

    /// Order the collected writes into a flush plan.
    ///
    /// Sorting is stable: operations on tables of equal depth keep the
    /// order in which their entities entered the session.
    pub fn order(&self, uow: UnitOfWork) -> FlushPlan {
        let counts = uow.counts();
        let (mut inserts, updates, mut deletes, orphans) = uow.into_parts();

        inserts.sort_by_key(|op| self.registry.depth(op.table()));
        deletes.sort_by_key(|op| std::cmp::Reverse(self.registry.depth(op.table())));

        let mut ops = inserts;
        ops.extend(updates);
        ops.extend(deletes);
        FlushPlan {
            ops,
            orphans,
            counts,
        }
    }
}

/// An ordered batch of writes.
#[derive(Debug, Default)]
pub struct FlushPlan {
    ops: Vec<StoreOp>,
    orphans: Vec<Orphan>,
    counts: PendingCounts,
}

impl FlushPlan {
    /// Operations in application order.
    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    /// Orphans deleted by this plan.
    pub fn orphans(&self) -> &[Orphan] {
        &self.orphans
    }

    /// Check if the plan has any operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Total number of operations in the plan.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// What a successful application of this plan wrote.
    pub fn result(&self) -> FlushResult {
        FlushResult {
            inserted: self.counts.inserts,
            updated: self.counts.updates,
            deleted: self.counts.deletes,
            orphans_removed: self.orphans.len(),
        }
    }
}

/// Result of a flush operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlushResult {
    /// Number of rows inserted.
    pub inserted: usize,
    /// Number of rows updated.
    pub updated: usize,
    /// Number of rows deleted, orphans included.
    pub deleted: usize,
    /// Number of deletes caused by orphan removal.
    pub orphans_removed: usize,
}

impl FlushResult {
    /// Total number of operations performed.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyorm_core::{FieldInfo, Model, Result, Row, SqlType, Value};

    struct Engine;
    struct Car;

    impl Model for Engine {
        const TABLE_NAME: &'static str = "engine";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        type Id = i64;

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: [FieldInfo; 1] =
                [FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true)];
            &FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            Vec::new()
        }

        fn from_row(_row: &Row) -> Result<Self> {
            Ok(Engine)
        }

        fn primary_key_value(&self) -> Vec<Value> {
            Vec::new()
        }
    }

    impl Model for Car {
        const TABLE_NAME: &'static str = "car";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        type Id = i64;

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: [FieldInfo; 2] = [
                FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                FieldInfo::new("engine", "engine_id", SqlType::BigInt)
                    .nullable(true)
                    .foreign_key("engine.id"),
            ];
            &FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            Vec::new()
        }

        fn from_row(_row: &Row) -> Result<Self> {
            Ok(Car)
        }

        fn primary_key_value(&self) -> Vec<Value> {
            Vec::new()
        }
    }

    fn registry() -> EntityRegistry {
        let mut registry = EntityRegistry::new();
        registry.register::<Car>().unwrap();
        registry.register::<Engine>().unwrap();
        registry
    }

    fn id_row(id: i64) -> Row {
        Row::from_pairs(vec![("id", Value::BigInt(id))])
    }

    fn shape(plan: &FlushPlan) -> Vec<(&'static str, &'static str)> {
        plan.ops().iter().map(|op| (op.verb(), op.table())).collect()
    }

    #[test]
    fn inserts_parents_first_and_deletes_children_first() {
        let registry = registry();
        let mut uow = UnitOfWork::new();
        uow.delete("engine", vec![Value::BigInt(1)], None);
        uow.delete("car", vec![Value::BigInt(1)], None);
        uow.insert("car", id_row(2));
        uow.insert("engine", id_row(2));
        uow.update(
            "car",
            vec![Value::BigInt(3)],
            vec![("engine_id", Value::Null)],
            None,
        );

        let plan = FlushOrderer::new(&registry).order(uow);
        assert_eq!(
            shape(&plan),
            vec![
                ("insert", "engine"),
                ("insert", "car"),
                ("update", "car"),
                ("delete", "car"),
                ("delete", "engine"),
            ]
        );
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn equal_depth_keeps_session_order() {
        let registry = registry();
        let mut uow = UnitOfWork::new();
        uow.insert("engine", id_row(7));
        uow.insert("engine", id_row(3));
        let plan = FlushOrderer::new(&registry).order(uow);
        let ids: Vec<_> = plan
            .ops()
            .iter()
            .filter_map(|op| match op {
                StoreOp::Insert { row, .. } => row.get_by_name("id").cloned(),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![Value::BigInt(7), Value::BigInt(3)]);
    }

    #[test]
    fn result_counts_orphans() {
        let registry = registry();
        let plan = FlushOrderer::new(&registry).order(UnitOfWork::new());
        assert!(plan.is_empty());
        assert_eq!(plan.result(), FlushResult::default());
        assert_eq!(plan.result().total(), 0);
    }
}
