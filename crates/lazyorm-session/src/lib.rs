//! Persistence session for lazyorm.
//!
//! `lazyorm-session` is the **unit-of-work layer**. A [`Session`] owns an
//! identity map of entity handles, decides which columns changed, and
//! writes everything back to a [`Store`] as one atomic batch.
//!
//! # Role In The Architecture
//!
//! - **Identity map**: one handle per (entity type, primary key).
//! - **Lazy references**: [`Session::get_reference`] hands out a handle that
//!   loads its row on first access.
//! - **Dirty tracking**: setters record columns inline, or a snapshot of the
//!   loaded row is diffed at flush ([`DirtyTracking`]).
//! - **Merge**: detached state is copied onto the managed handle.
//! - **Orphan removal**: clearing an owned one-to-one association deletes
//!   the released row at the next flush.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(store, registry, statistics, SessionConfig::default());
//!
//! // No row is read here
//! let animal = session.get_reference::<Animal>(&"Ella".to_string())?;
//!
//! // First setter loads the row, then applies the write
//! animal.set("color", "grey")?;
//!
//! // Writes `color` only
//! session.commit()?;
//! ```

pub mod change_tracker;
pub mod context;
pub mod flush;
pub mod identity_map;
pub mod proxy;
pub mod registry;
pub mod statistics;
pub mod unit_of_work;

pub use change_tracker::{ChangeTracker, DirtyTracking};
pub use context::SessionContext;
pub use flush::{FlushOrderer, FlushPlan, FlushResult};
pub use identity_map::ObjectKey;
pub use proxy::{EntityRef, EntityStatus};
pub use registry::EntityRegistry;
pub use statistics::{Statistics, StatisticsSnapshot};
pub use unit_of_work::{Orphan, PendingCounts, UnitOfWork};

use identity_map::{IdentityMap, same_value};
use lazyorm_core::error::{
    Error, SchemaErrorKind, SessionErrorKind, TransactionError, TransactionErrorKind, TypeError,
};
use lazyorm_core::{Lazy, Model, Result, Store, Value, find_relationship, id_values};
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Configuration for Session behavior.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// How dirty columns are detected.
    pub dirty_tracking: DirtyTracking,
    /// Log every store statement at info level under `lazyorm::sql`.
    pub log_statements: bool,
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting operations.
    Active,
    /// Flushed and ended by `commit`.
    Committed,
    /// Ended by `rollback`; pending changes were discarded.
    RolledBack,
    /// Ended by `close`.
    Closed,
}

// ============================================================================
// Session
// ============================================================================

/// The Session is the central unit-of-work manager.
///
/// It spans one transaction: every handle it returns is managed until the
/// session commits, rolls back or closes, after which all of them are
/// detached. Uninitialized handles then fail with a lazy initialization
/// error; initialized ones stay readable.
pub struct Session {
    context: Arc<SessionContext>,
    registry: Arc<EntityRegistry>,
    identity_map: IdentityMap,
    state: SessionState,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("managed", &self.identity_map.len())
            .field("config", self.context.config())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session over `store`.
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<EntityRegistry>,
        statistics: Arc<Statistics>,
        config: SessionConfig,
    ) -> Self {
        statistics.record_session_opened();
        tracing::debug!(dirty_tracking = %config.dirty_tracking, "session opened");
        Self {
            context: Arc::new(SessionContext::new(store, statistics, config)),
            registry,
            identity_map: IdentityMap::new(),
            state: SessionState::Active,
        }
    }

    /// Get the session configuration.
    pub fn config(&self) -> &SessionConfig {
        self.context.config()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of handles in the identity map.
    pub fn managed_count(&self) -> usize {
        self.identity_map.len()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Committed => Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyCommitted,
                message: "transaction already committed".to_string(),
            })),
            SessionState::RolledBack => Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyRolledBack,
                message: "transaction already rolled back".to_string(),
            })),
            SessionState::Closed => Err(Error::session(
                SessionErrorKind::Closed,
                "Session",
                "session is closed",
            )),
        }
    }

    fn ensure_usable<M: Model>(&self) -> Result<()> {
        self.ensure_open()?;
        self.registry.require::<M>()
    }

    // ========================================================================
    // Object Tracking
    // ========================================================================

    /// Make a new instance managed; it is inserted at the next flush.
    #[tracing::instrument(level = "debug", skip(self, value), fields(table = M::TABLE_NAME))]
    pub fn persist<M: Model>(&mut self, value: M) -> Result<EntityRef<M>> {
        self.ensure_usable::<M>()?;
        let pk = value.primary_key_value();
        check_key_width::<M>(&pk)?;
        if let Some(existing) = self.identity_map.get_typed::<M>(&pk) {
            return Err(Error::session(
                SessionErrorKind::EntityExists,
                M::entity_name(),
                format!(
                    "an instance with identifier {:?} is already {:?} in this session",
                    existing.id_values(),
                    existing.status()
                ),
            ));
        }
        let handle = EntityRef::transient(value, Arc::clone(&self.context));
        self.identity_map
            .insert(ObjectKey::from_pk::<M>(&pk), handle.as_managed());
        Ok(handle)
    }

    /// Find an entity by identifier.
    ///
    /// Returns the managed handle, initialized, or `None` when no row exists
    /// or the instance was removed in this session.
    #[tracing::instrument(level = "debug", skip(self, id), fields(table = M::TABLE_NAME))]
    pub fn find<M: Model>(&mut self, id: &M::Id) -> Result<Option<EntityRef<M>>> {
        self.ensure_usable::<M>()?;
        let pk = id_values::<M>(id)?;

        if let Some(handle) = self.identity_map.get_typed::<M>(&pk) {
            if handle.status() == EntityStatus::Removed {
                return Ok(None);
            }
            return match handle.ensure_initialized() {
                Ok(()) => Ok(Some(handle)),
                Err(err) if err.session_kind() == Some(SessionErrorKind::EntityNotFound) => {
                    Ok(None)
                }
                Err(err) => Err(err),
            };
        }

        let Some(row) = self.context.load_row(M::TABLE_NAME, &pk)? else {
            tracing::debug!(pk = ?pk, "no row");
            return Ok(None);
        };
        let handle = EntityRef::loaded(M::from_row(&row)?, Arc::clone(&self.context));
        self.identity_map
            .insert(ObjectKey::from_pk::<M>(&pk), handle.as_managed());
        Ok(Some(handle))
    }

    /// Get a lazy reference; no row is read until the handle is accessed.
    #[tracing::instrument(level = "debug", skip(self, id), fields(table = M::TABLE_NAME))]
    pub fn get_reference<M: Model>(&mut self, id: &M::Id) -> Result<EntityRef<M>> {
        self.ensure_usable::<M>()?;
        let pk = id_values::<M>(id)?;
        Ok(self.reference_by_values(pk))
    }

    fn reference_by_values<M: Model>(&mut self, pk: Vec<Value>) -> EntityRef<M> {
        if let Some(handle) = self.identity_map.get_typed::<M>(&pk) {
            return handle;
        }
        let key = ObjectKey::from_pk::<M>(&pk);
        let handle = EntityRef::reference(pk, Arc::clone(&self.context));
        self.identity_map.insert(key, handle.as_managed());
        handle
    }

    /// Resolve an association holder into a lazy reference.
    pub fn resolve<T: Model>(&mut self, lazy: &Lazy<T>) -> Result<Option<EntityRef<T>>> {
        self.ensure_usable::<T>()?;
        let Some(fk) = lazy.fk() else {
            return Ok(None);
        };
        let pk = vec![fk.clone()];
        check_key_width::<T>(&pk)?;
        Ok(Some(self.reference_by_values(pk)))
    }

    /// Copy the state of `entity` onto the managed instance of its identity.
    ///
    /// Returns the managed handle. Primary keys are never copied, and a
    /// version that differs from the managed one is rejected as stale.
    /// An uninitialized argument carries no state and leaves the managed
    /// instance as it is. With no managed instance and no row, a copy is
    /// scheduled for insertion and the argument stays detached.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(table = M::TABLE_NAME))]
    pub fn merge<M: Model>(&mut self, entity: &EntityRef<M>) -> Result<EntityRef<M>> {
        self.ensure_usable::<M>()?;
        if self.identity_map.contains_handle(entity) {
            return Ok(entity.clone());
        }
        let pk = entity.id_values().to_vec();
        check_key_width::<M>(&pk)?;

        let Some(source) = entity.snapshot_row() else {
            tracing::debug!("merging uninitialized reference, nothing to copy");
            return Ok(self.reference_by_values(pk));
        };

        let managed = match self.identity_map.get_typed::<M>(&pk) {
            Some(handle) => {
                if handle.status() == EntityStatus::Removed {
                    return Err(Error::session(
                        SessionErrorKind::EntityRemoved,
                        M::entity_name(),
                        format!("cannot merge {:?}: instance was removed", pk),
                    ));
                }
                handle.ensure_initialized()?;
                handle
            }
            None => match self.context.load_row(M::TABLE_NAME, &pk)? {
                Some(row) => {
                    let handle =
                        EntityRef::loaded(M::from_row(&row)?, Arc::clone(&self.context));
                    self.identity_map
                        .insert(ObjectKey::from_pk::<M>(&pk), handle.as_managed());
                    handle
                }
                None => {
                    let copy = M::from_row(&source)?;
                    let handle = EntityRef::transient(copy, Arc::clone(&self.context));
                    self.identity_map
                        .insert(ObjectKey::from_pk::<M>(&pk), handle.as_managed());
                    return Ok(handle);
                }
            },
        };
        managed.copy_state_from(&source)?;
        Ok(managed)
    }

    /// Merge a plain value; see [`Session::merge`].
    pub fn merge_value<M: Model>(&mut self, value: M) -> Result<EntityRef<M>> {
        self.merge(&EntityRef::detached(value))
    }

    /// Schedule a managed instance for deletion.
    ///
    /// A new instance is simply forgotten. A lazy reference is loaded first
    /// so its version and associations are known.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(table = M::TABLE_NAME))]
    pub fn remove<M: Model>(&mut self, entity: &EntityRef<M>) -> Result<()> {
        self.ensure_usable::<M>()?;
        if !self.identity_map.contains_handle(entity) {
            return Err(Error::session(
                SessionErrorKind::NotManaged,
                M::entity_name(),
                format!("{:?} is not managed by this session", entity.id_values()),
            ));
        }
        let managed = entity.as_managed();
        match entity.status() {
            EntityStatus::New => {
                self.identity_map.remove(&managed.key());
                managed.detach();
            }
            EntityStatus::Managed => {
                entity.ensure_initialized()?;
                managed.set_status(EntityStatus::Removed);
            }
            EntityStatus::Removed | EntityStatus::Detached => {}
        }
        Ok(())
    }

    /// Navigate the inverse side of a one-to-one association.
    ///
    /// `relationship` names a `mapped_by` relationship of `T`; the owner of
    /// type `O` whose key currently references `target` is returned.
    /// In-session state wins over stored rows.
    #[tracing::instrument(level = "debug", skip(self, target), fields(table = T::TABLE_NAME))]
    pub fn find_inverse<T: Model, O: Model>(
        &mut self,
        target: &EntityRef<T>,
        relationship: &str,
    ) -> Result<Option<EntityRef<O>>> {
        self.ensure_usable::<T>()?;
        self.registry.require::<O>()?;

        let invalid = |message: String| {
            Error::schema(SchemaErrorKind::InvalidRelationship, Some(T::entity_name()), message)
        };
        let rel = find_relationship::<T>(relationship)
            .ok_or_else(|| invalid(format!("no relationship '{}'", relationship)))?;
        let Some(mapped_by) = rel.mapped_by else {
            return Err(invalid(format!("'{}' is not an inverse relationship", rel.name)));
        };
        if rel.related_table != O::TABLE_NAME {
            return Err(invalid(format!(
                "'{}' relates to '{}', not '{}'",
                rel.name,
                rel.related_table,
                O::TABLE_NAME
            )));
        }
        let local_key = find_relationship::<O>(mapped_by)
            .and_then(|owning| owning.local_key)
            .ok_or_else(|| invalid(format!("'{}' has no owning side '{}'", rel.name, mapped_by)))?;
        let [fk] = target.id_values() else {
            return Err(invalid(format!(
                "'{}' needs a single-column key on '{}'",
                rel.name,
                T::TABLE_NAME
            )));
        };

        for owner in self.identity_map.of_type::<O>() {
            if owner.status() == EntityStatus::Removed {
                continue;
            }
            if owner
                .peek_column(local_key)
                .is_some_and(|v| same_value(&v, fk))
            {
                return Ok(Some(owner));
            }
        }

        for row in self.context.select_by(O::TABLE_NAME, local_key, fk)? {
            let owner = O::from_row(&row)?;
            let pk = owner.primary_key_value();
            if let Some(managed) = self.identity_map.get_typed::<O>(&pk) {
                if managed.status() == EntityStatus::Removed {
                    continue;
                }
                managed.ensure_initialized()?;
                if managed
                    .peek_column(local_key)
                    .is_some_and(|v| same_value(&v, fk))
                {
                    return Ok(Some(managed));
                }
                continue;
            }
            self.context.statistics().record_load();
            let handle = EntityRef::loaded(owner, Arc::clone(&self.context));
            self.identity_map
                .insert(ObjectKey::from_pk::<O>(&pk), handle.as_managed());
            return Ok(Some(handle));
        }
        Ok(None)
    }

    /// Is this exact handle managed (and not removed) by this session?
    pub fn contains<M: Model>(&self, entity: &EntityRef<M>) -> bool {
        self.state == SessionState::Active
            && self.identity_map.contains_handle(entity)
            && entity.status() != EntityStatus::Removed
    }

    /// Would a flush write anything?
    pub fn is_dirty(&self) -> bool {
        let mode = self.context.config().dirty_tracking;
        self.identity_map
            .ordered()
            .iter()
            .any(|entity| entity.has_changes(mode))
    }

    /// Columns of `entity` a flush would update.
    pub fn dirty_fields<M: Model>(&self, entity: &EntityRef<M>) -> Vec<&'static str> {
        entity.dirty_columns(self.context.config().dirty_tracking)
    }

    // ========================================================================
    // Flush / Transaction
    // ========================================================================

    /// Write pending changes to the store as one atomic batch.
    ///
    /// On error nothing was written and every handle keeps its pending
    /// state.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn flush(&mut self) -> Result<FlushResult> {
        self.ensure_open()?;
        let mode = self.context.config().dirty_tracking;
        let entities = self.identity_map.ordered();

        let mut uow = UnitOfWork::new();
        for entity in &entities {
            entity.plan(mode, &mut uow)?;
        }
        let plan = FlushOrderer::new(&self.registry).order(uow);
        if plan.is_empty() {
            tracing::debug!("nothing to flush");
            return Ok(FlushResult::default());
        }

        if self.context.config().log_statements {
            for op in plan.ops() {
                tracing::info!(target: "lazyorm::sql", "{}", op);
            }
        }
        self.context.store().apply(plan.ops())?;

        for entity in &entities {
            entity.complete_flush(mode)?;
        }
        for entity in &entities {
            if entity.status() == EntityStatus::Removed {
                self.identity_map.remove(&entity.key());
            }
        }
        for orphan in plan.orphans() {
            let Some(type_id) = self.registry.type_of_table(orphan.table) else {
                continue;
            };
            if let Some(entity) = self.identity_map.remove(&ObjectKey::new(type_id, &orphan.pk)) {
                tracing::debug!(entity = entity.entity_name(), pk = ?orphan.pk, "orphan removed");
                entity.set_status(EntityStatus::Removed);
                entity.detach();
            }
        }

        let result = plan.result();
        self.context.statistics().record_flush(
            result.inserted as u64,
            result.updated as u64,
            result.deleted as u64,
        );
        tracing::info!(
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            orphans = result.orphans_removed,
            "flush complete"
        );
        Ok(result)
    }

    /// Flush and end the transaction.
    ///
    /// If the flush fails the session stays active so the caller can roll
    /// back.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn commit(&mut self) -> Result<FlushResult> {
        let result = self.flush()?;
        self.end(SessionState::Committed);
        Ok(result)
    }

    /// Discard pending changes and end the transaction.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.end(SessionState::RolledBack);
        Ok(())
    }

    /// Close the session, discarding anything not flushed.
    pub fn close(&mut self) {
        if self.state == SessionState::Active {
            self.end(SessionState::Closed);
        }
        self.state = SessionState::Closed;
    }

    fn end(&mut self, state: SessionState) {
        let detached = self.identity_map.drain();
        for entity in &detached {
            entity.detach();
        }
        self.state = state;
        self.context.statistics().record_session_closed();
        tracing::debug!(state = ?state, detached = detached.len(), "session ended");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            self.end(SessionState::Closed);
        }
    }
}

fn check_key_width<M: Model>(pk: &[Value]) -> Result<()> {
    if pk.len() == M::PRIMARY_KEY.len() {
        return Ok(());
    }
    Err(Error::Type(TypeError {
        expected: "identifier matching the primary key width",
        actual: format!(
            "{} value(s) for {} key column(s) of {}",
            pk.len(),
            M::PRIMARY_KEY.len(),
            M::TABLE_NAME
        ),
        column: None,
        rust_type: None,
    }))
}
