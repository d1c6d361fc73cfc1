//! Unit of Work pattern implementation for the lazyorm session.
//!
//! The Unit of Work collects every write a flush has to make: inserts for
//! new entities, column updates for dirty ones, deletes for removed ones
//! and for orphans released by one-to-one associations. The
//! [`FlushOrderer`](crate::flush::FlushOrderer) then sorts the collected
//! operations into a batch the store applies atomically.

use crate::identity_map::KeyValues;
use lazyorm_core::error::{Error, SchemaErrorKind};
use lazyorm_core::{RelationshipInfo, Result, Row, StoreOp, Value, VersionCheck};
use serde::Serialize;
use std::collections::HashSet;

/// An orphan scheduled for deletion by a one-to-one association.
#[derive(Debug, Clone, PartialEq)]
pub struct Orphan {
    /// Table of the orphaned entity.
    pub table: &'static str,
    /// Its primary key.
    pub pk: Vec<Value>,
}

/// Writes collected for one flush.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    inserts: Vec<StoreOp>,
    updates: Vec<StoreOp>,
    deletes: Vec<StoreOp>,
    /// (table, key) of every scheduled delete.
    deleted: HashSet<(&'static str, KeyValues)>,
    orphans: Vec<Orphan>,
}

/// Number of writes a flush would make.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    /// Rows to insert.
    pub inserts: usize,
    /// Rows to update.
    pub updates: usize,
    /// Rows to delete, orphans included.
    pub deletes: usize,
}

impl PendingCounts {
    /// Total number of writes.
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

impl UnitOfWork {
    /// Create an empty Unit of Work.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an insert.
    pub fn insert(&mut self, table: &'static str, row: Row) {
        self.inserts.push(StoreOp::Insert { table, row });
    }

    /// Schedule a column update.
    ///
    /// An update with no changes is dropped.
    pub fn update(
        &mut self,
        table: &'static str,
        pk: Vec<Value>,
        changes: Vec<(&'static str, Value)>,
        version: Option<VersionCheck>,
    ) {
        if changes.is_empty() {
            return;
        }
        self.updates.push(StoreOp::Update {
            table,
            pk,
            changes,
            version,
        });
    }

    /// Schedule a delete; returns `false` if the row was already scheduled.
    pub fn delete(
        &mut self,
        table: &'static str,
        pk: Vec<Value>,
        version: Option<VersionCheck>,
    ) -> bool {
        if !self.deleted.insert((table, KeyValues::new(&pk))) {
            return false;
        }
        self.deletes.push(StoreOp::Delete { table, pk, version });
        true
    }

    /// Schedule deletion of the entity `fk` points at through `rel`.
    pub fn orphan(&mut self, rel: &RelationshipInfo, fk: Value) -> Result<()> {
        let key = rel.related_primary_key();
        if key.len() != 1 {
            return Err(Error::schema(
                SchemaErrorKind::InvalidRelationship,
                None,
                format!(
                    "orphan removal through '{}' needs a single-column key on '{}', found {} column(s)",
                    rel.name,
                    rel.related_table,
                    key.len()
                ),
            ));
        }
        let pk = vec![fk];
        if self.delete(rel.related_table, pk.clone(), None) {
            self.orphans.push(Orphan {
                table: rel.related_table,
                pk,
            });
        }
        Ok(())
    }

    /// Orphans scheduled so far.
    pub fn orphans(&self) -> &[Orphan] {
        &self.orphans
    }

    /// Is there nothing to write?
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Counts of scheduled writes.
    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            inserts: self.inserts.len(),
            updates: self.updates.len(),
            deletes: self.deletes.len(),
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<StoreOp>, Vec<StoreOp>, Vec<StoreOp>, Vec<Orphan>) {
        (self.inserts, self.updates, self.deletes, self.orphans)
    }
}
