//! Lazy entity handles.
//!
//! An [`EntityRef`] is the session's handle on one entity identity. It may
//! be created without data (a reference); the first getter or setter call
//! loads the row through the owning session and flips the handle to
//! initialized, exactly once. Setters record the written column in the
//! handle's change tracker as they happen.

use crate::change_tracker::{ChangeTracker, DirtyTracking};
use crate::context::SessionContext;
use crate::identity_map::{ObjectKey, same_value};
use crate::unit_of_work::UnitOfWork;
use lazyorm_core::error::{Error, SessionErrorKind, TypeError};
use lazyorm_core::{
    FieldInfo, Model, Result, Row, Value, VersionCheck, copy_model, orphan_removal_relationships,
};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of a handle relative to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Persisted by this session, inserted at the next flush.
    New,
    /// Tracked by an open session.
    Managed,
    /// Scheduled for deletion, or deleted by a flush.
    Removed,
    /// Not associated with an open session.
    Detached,
}

pub(crate) struct EntityState<M> {
    data: Option<M>,
    /// Row as last loaded or flushed; `None` until the entity exists in the store.
    baseline: Option<Row>,
    changes: ChangeTracker,
    status: EntityStatus,
    context: Option<Arc<SessionContext>>,
}

impl<M: Model> EntityState<M> {
    fn current_row(&self) -> Option<Row> {
        self.data.as_ref().map(|d| Row::from_pairs(d.to_row()))
    }

    fn dirty_columns(&self, mode: DirtyTracking, current: &Row) -> Vec<&'static str> {
        self.changes
            .dirty_columns(mode, M::fields(), current, self.baseline.as_ref())
    }
}

/// Shared storage behind every clone of one [`EntityRef`].
pub struct EntityCell<M: Model> {
    pk: Vec<Value>,
    state: RwLock<EntityState<M>>,
}

impl<M: Model> EntityCell<M> {
    fn new(pk: Vec<Value>, state: EntityState<M>) -> Self {
        Self {
            pk,
            state: RwLock::new(state),
        }
    }

    fn describe(&self) -> String {
        format!("{}#{:?}", M::entity_name(), self.pk)
    }

    /// Load the row into `state` unless it already holds data.
    fn initialize(&self, state: &mut EntityState<M>) -> Result<()> {
        if state.data.is_some() {
            return Ok(());
        }
        let Some(context) = state.context.clone() else {
            return Err(Error::session(
                SessionErrorKind::LazyInitialization,
                M::entity_name(),
                format!("could not initialize proxy [{}] - no session", self.describe()),
            ));
        };
        let Some(row) = context.load_row(M::TABLE_NAME, &self.pk)? else {
            return Err(Error::session(
                SessionErrorKind::EntityNotFound,
                M::entity_name(),
                format!("unable to find {}", self.describe()),
            ));
        };
        let data = M::from_row(&row)?;
        state.baseline = Some(Row::from_pairs(data.to_row()));
        state.data = Some(data);
        tracing::debug!(entity = M::entity_name(), pk = ?self.pk, "initialized lazy reference");
        Ok(())
    }

    fn write_initialized(&self) -> Result<RwLockWriteGuard<'_, EntityState<M>>> {
        let mut state = self.state.write();
        self.initialize(&mut state)?;
        Ok(state)
    }

    fn missing_data(&self) -> Error {
        Error::session(
            SessionErrorKind::EntityNotFound,
            M::entity_name(),
            format!("{} holds no state", self.describe()),
        )
    }
}

/// Resolve a column name to its `'static` field metadata.
fn field_of<M: Model>(column: &str) -> Result<&'static FieldInfo> {
    M::fields()
        .iter()
        .find(|f| f.column_name == column)
        .ok_or_else(|| {
            Error::Type(TypeError {
                expected: "mapped column",
                actual: format!("{} has no column '{}'", M::entity_name(), column),
                column: Some(column.to_string()),
                rust_type: None,
            })
        })
}

/// Key and version columns are owned by the session; writes to them are
/// rejected.
fn immutable_column(field: &FieldInfo, action: &str) -> Option<Error> {
    let role = if field.primary_key {
        "primary key"
    } else if field.version {
        "version"
    } else {
        return None;
    };
    Some(Error::Type(TypeError {
        expected: "writable column",
        actual: format!("{} column '{}' {}", role, field.column_name, action),
        column: Some(field.column_name.to_string()),
        rust_type: None,
    }))
}

/// A handle on one entity identity.
///
/// Clones share state: a write through one clone is visible through all of
/// them. Two lookups of the same identity in one session return clones of
/// the same handle ([`EntityRef::ptr_eq`] holds).
///
/// Accessors return a `Result` because the first access may load the row.
/// No accessor hands out a borrow of the handle's state: [`get`](Self::get)
/// returns a copy and [`with`](Self::with) releases its read lock when the
/// closure returns, so a session may flush or close while copies are alive.
/// The closure given to `with` must not write through the same handle.
pub struct EntityRef<M: Model>(Arc<EntityCell<M>>);

impl<M: Model> Clone for EntityRef<M> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<M: Model> fmt::Debug for EntityRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.read();
        f.debug_struct("EntityRef")
            .field("entity", &M::entity_name())
            .field("pk", &self.0.pk)
            .field("status", &state.status)
            .field("initialized", &state.data.is_some())
            .finish()
    }
}

impl<M: Model> EntityRef<M> {
    fn with_state(pk: Vec<Value>, state: EntityState<M>) -> Self {
        Self(Arc::new(EntityCell::new(pk, state)))
    }

    pub(crate) fn from_cell(cell: Arc<EntityCell<M>>) -> Self {
        Self(cell)
    }

    /// A managed handle over state already read from the store.
    pub(crate) fn loaded(data: M, context: Arc<SessionContext>) -> Self {
        let baseline = Row::from_pairs(data.to_row());
        Self::with_state(
            data.primary_key_value(),
            EntityState {
                data: Some(data),
                baseline: Some(baseline),
                changes: ChangeTracker::new(),
                status: EntityStatus::Managed,
                context: Some(context),
            },
        )
    }

    /// A managed handle with no data yet.
    pub(crate) fn reference(pk: Vec<Value>, context: Arc<SessionContext>) -> Self {
        Self::with_state(
            pk,
            EntityState {
                data: None,
                baseline: None,
                changes: ChangeTracker::new(),
                status: EntityStatus::Managed,
                context: Some(context),
            },
        )
    }

    /// A handle scheduled for insertion.
    pub(crate) fn transient(data: M, context: Arc<SessionContext>) -> Self {
        Self::with_state(
            data.primary_key_value(),
            EntityState {
                data: Some(data),
                baseline: None,
                changes: ChangeTracker::new(),
                status: EntityStatus::New,
                context: Some(context),
            },
        )
    }

    /// Wrap a plain value in a detached, initialized handle.
    ///
    /// The handle belongs to no session; hand it to `Session::merge` to
    /// reconcile it with managed state.
    pub fn detached(data: M) -> Self {
        Self::with_state(
            data.primary_key_value(),
            EntityState {
                data: Some(data),
                baseline: None,
                changes: ChangeTracker::new(),
                status: EntityStatus::Detached,
                context: None,
            },
        )
    }

    /// Primary-key values of this identity, in key column order.
    pub fn id_values(&self) -> &[Value] {
        &self.0.pk
    }

    /// Whether two handles share state.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Has the row been loaded (or was the value supplied)?
    pub fn is_initialized(&self) -> bool {
        self.0.state.read().data.is_some()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> EntityStatus {
        self.0.state.read().status
    }

    /// Copy of the entity, loading it first if needed.
    pub fn get(&self) -> Result<M> {
        copy_model(&*self.read_initialized()?)
    }

    fn read_initialized(&self) -> Result<MappedRwLockReadGuard<'_, M>> {
        if let Ok(guard) = RwLockReadGuard::try_map(self.0.state.read(), |s| s.data.as_ref()) {
            return Ok(guard);
        }
        let state = self.0.write_initialized()?;
        RwLockReadGuard::try_map(RwLockWriteGuard::downgrade(state), |s| s.data.as_ref())
            .map_err(|_| self.0.missing_data())
    }

    /// Run `f` against the entity, loading it first if needed.
    pub fn with<R>(&self, f: impl FnOnce(&M) -> R) -> Result<R> {
        let data = self.read_initialized()?;
        Ok(f(&data))
    }

    /// Assign one column and record it as dirty.
    ///
    /// An uninitialized handle is loaded first, then the new value is
    /// applied over the loaded state.
    pub fn set(&self, column: &str, value: impl Into<Value>) -> Result<()> {
        self.set_with(column, |_| value)
    }

    /// Assign one column from a value computed off the current state.
    pub fn set_with<V: Into<Value>>(&self, column: &str, f: impl FnOnce(&M) -> V) -> Result<()> {
        let field = field_of::<M>(column)?;
        if let Some(err) = immutable_column(field, "is immutable") {
            return Err(err);
        }
        let mut guard = self.0.write_initialized()?;
        let state = &mut *guard;
        let Some(data) = state.data.as_mut() else {
            return Err(self.0.missing_data());
        };
        let value = f(data).into();
        data.set_value(field.column_name, value)?;
        state.changes.record(field.column_name);
        Ok(())
    }

    /// Mutate the entity through a closure, recording every column whose
    /// value changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut M) -> R) -> Result<R> {
        let mut guard = self.0.write_initialized()?;
        let state = &mut *guard;
        let Some(data) = state.data.as_mut() else {
            return Err(self.0.missing_data());
        };
        let before = Row::from_pairs(data.to_row());
        let out = f(data);
        let after = Row::from_pairs(data.to_row());
        let mut changed = Vec::new();
        for column in after.changed_columns(&before) {
            let field = field_of::<M>(column)?;
            if let Some(err) = immutable_column(field, "was modified") {
                *data = M::from_row(&before)?;
                return Err(err);
            }
            changed.push(field.column_name);
        }
        for column in changed {
            state.changes.record(column);
        }
        Ok(out)
    }

    /// Copy the entity out of the handle.
    pub fn to_value(&self) -> Result<M> {
        self.get()
    }

    /// Current row without forcing a load; `None` while uninitialized.
    pub(crate) fn snapshot_row(&self) -> Option<Row> {
        self.0.state.read().current_row()
    }

    /// Current value of `column` without forcing a load.
    pub(crate) fn peek_column(&self, column: &str) -> Option<Value> {
        self.0
            .state
            .read()
            .data
            .as_ref()
            .and_then(|d| d.column_value(column))
    }

    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        self.0.write_initialized().map(drop)
    }

    /// Copy every non-key column of `source` onto this handle.
    ///
    /// The version column is compared rather than copied: a source carrying
    /// another version is stale.
    pub(crate) fn copy_state_from(&self, source: &Row) -> Result<()> {
        let mut guard = self.0.write_initialized()?;
        let state = &mut *guard;
        let Some(data) = state.data.as_mut() else {
            return Err(self.0.missing_data());
        };
        let mut row = Row::from_pairs(data.to_row());
        if let Some(column) = M::version_column() {
            let mine = row.get_by_name(column).cloned().unwrap_or(Value::Null);
            let theirs = source.get_by_name(column).cloned().unwrap_or(Value::Null);
            if !same_value(&mine, &theirs) {
                return Err(Error::session(
                    SessionErrorKind::StaleState,
                    M::entity_name(),
                    format!(
                        "{} was updated by another transaction (version {:?}, merged {:?})",
                        self.0.describe(),
                        mine,
                        theirs
                    ),
                ));
            }
        }
        let mut copied = Vec::new();
        for field in M::fields() {
            if field.primary_key || field.version {
                continue;
            }
            if let Some(value) = source.get_by_name(field.column_name) {
                row.set(field.column_name, value.clone())?;
                copied.push(field.column_name);
            }
        }
        *data = M::from_row(&row)?;
        for column in copied {
            state.changes.record(column);
        }
        tracing::debug!(entity = M::entity_name(), pk = ?self.0.pk, "merged detached state");
        Ok(())
    }

    /// Columns a flush would write now.
    pub(crate) fn dirty_columns(&self, mode: DirtyTracking) -> Vec<&'static str> {
        let state = self.0.state.read();
        state
            .current_row()
            .map(|row| state.dirty_columns(mode, &row))
            .unwrap_or_default()
    }

    pub(crate) fn as_managed(&self) -> Arc<dyn ManagedEntity> {
        Arc::clone(&self.0) as Arc<dyn ManagedEntity>
    }
}

/// Type-erased view of a handle used by the session's bookkeeping.
pub(crate) trait ManagedEntity: Send + Sync {
    fn entity_name(&self) -> &'static str;
    fn key(&self) -> ObjectKey;
    fn status(&self) -> EntityStatus;
    fn set_status(&self, status: EntityStatus);
    /// Drop the session context; removed handles keep their status.
    fn detach(&self);
    fn has_changes(&self, mode: DirtyTracking) -> bool;
    /// Contribute this entity's writes to a flush.
    fn plan(&self, mode: DirtyTracking, uow: &mut UnitOfWork) -> Result<()>;
    /// Re-baseline after the flush batch was applied.
    fn complete_flush(&self, mode: DirtyTracking) -> Result<()>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Model> ManagedEntity for EntityCell<M> {
    fn entity_name(&self) -> &'static str {
        M::entity_name()
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::from_pk::<M>(&self.pk)
    }

    fn status(&self) -> EntityStatus {
        self.state.read().status
    }

    fn set_status(&self, status: EntityStatus) {
        self.state.write().status = status;
    }

    fn detach(&self) {
        let mut state = self.state.write();
        state.context = None;
        if state.status != EntityStatus::Removed {
            state.status = EntityStatus::Detached;
        }
    }

    fn has_changes(&self, mode: DirtyTracking) -> bool {
        let state = self.state.read();
        match state.status {
            EntityStatus::New | EntityStatus::Removed => true,
            EntityStatus::Detached => false,
            EntityStatus::Managed => state
                .current_row()
                .is_some_and(|row| !state.dirty_columns(mode, &row).is_empty()),
        }
    }

    fn plan(&self, mode: DirtyTracking, uow: &mut UnitOfWork) -> Result<()> {
        let state = self.state.read();
        let Some(current) = state.current_row() else {
            // Never initialized: nothing was read, so nothing changed.
            return Ok(());
        };
        let version_column = M::version_column();
        let version_of = |row: &Row, column: &'static str| VersionCheck {
            column,
            expected: row.get_by_name(column).cloned().unwrap_or(Value::Null),
        };

        match state.status {
            EntityStatus::New => {
                let mut row = current;
                if let Some(column) = version_column {
                    if row.get_by_name(column).is_none_or(Value::is_null) {
                        row.set(column, Value::Null.next_version()?)?;
                    }
                }
                uow.insert(M::TABLE_NAME, row);
            }
            EntityStatus::Managed => {
                let dirty = state.dirty_columns(mode, &current);
                if !dirty.is_empty() {
                    let mut changes: Vec<(&'static str, Value)> = dirty
                        .iter()
                        .map(|c| (*c, current.get_by_name(c).cloned().unwrap_or(Value::Null)))
                        .collect();
                    let version = match version_column {
                        Some(column) => {
                            let check = version_of(&current, column);
                            changes.push((column, check.expected.next_version()?));
                            Some(check)
                        }
                        None => None,
                    };
                    uow.update(M::TABLE_NAME, self.pk.clone(), changes, version);
                }
                for rel in orphan_removal_relationships::<M>() {
                    let Some(key) = rel.local_key else { continue };
                    let old = state
                        .baseline
                        .as_ref()
                        .and_then(|b| b.get_by_name(key))
                        .cloned()
                        .unwrap_or(Value::Null);
                    let new = current.get_by_name(key).cloned().unwrap_or(Value::Null);
                    if !old.is_null() && !same_value(&old, &new) {
                        tracing::debug!(
                            entity = M::entity_name(),
                            relationship = rel.name,
                            orphan = ?old,
                            "association cleared, scheduling orphan removal"
                        );
                        uow.orphan(rel, old)?;
                    }
                }
            }
            EntityStatus::Removed => {
                let version = version_column.map(|column| version_of(&current, column));
                uow.delete(M::TABLE_NAME, self.pk.clone(), version);
                for rel in orphan_removal_relationships::<M>() {
                    let Some(key) = rel.local_key else { continue };
                    let owned = [
                        current.get_by_name(key),
                        state.baseline.as_ref().and_then(|b| b.get_by_name(key)),
                    ];
                    for fk in owned.into_iter().flatten() {
                        if !fk.is_null() {
                            uow.orphan(rel, fk.clone())?;
                        }
                    }
                }
            }
            EntityStatus::Detached => {}
        }
        Ok(())
    }

    fn complete_flush(&self, mode: DirtyTracking) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        match state.status {
            EntityStatus::New | EntityStatus::Managed => {
                let Some(current) = state.current_row() else {
                    return Ok(());
                };
                let Some(data) = state.data.as_mut() else {
                    return Ok(());
                };
                if let Some(column) = M::version_column() {
                    let version = current.get_by_name(column).cloned().unwrap_or(Value::Null);
                    let bumped = if state.status == EntityStatus::New {
                        if version.is_null() {
                            Some(Value::Null.next_version()?)
                        } else {
                            None
                        }
                    } else if state
                        .changes
                        .dirty_columns(mode, M::fields(), &current, state.baseline.as_ref())
                        .is_empty()
                    {
                        None
                    } else {
                        Some(version.next_version()?)
                    };
                    if let Some(next) = bumped {
                        data.set_value(column, next)?;
                    }
                }
                state.baseline = Some(Row::from_pairs(data.to_row()));
                state.changes.clear();
                state.status = EntityStatus::Managed;
            }
            EntityStatus::Removed => {
                state.context = None;
            }
            EntityStatus::Detached => {}
        }
        Ok(())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
