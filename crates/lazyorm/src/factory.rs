//! Session factory and transactional scoping.

use crate::config::OrmConfig;
use lazyorm_core::{Model, Result, Store};
use lazyorm_memory::MemoryStore;
use lazyorm_session::{EntityRegistry, Session, SessionState, Statistics};
use std::fmt;
use std::sync::Arc;

/// Opens sessions over one store for a fixed set of entity types.
///
/// Building the factory validates every registered mapping and creates
/// the tables in the store.
pub struct SessionFactory {
    config: OrmConfig,
    store: Arc<dyn Store>,
    registry: Arc<EntityRegistry>,
    statistics: Arc<Statistics>,
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("config", &self.config)
            .field("tables", &self.registry.tables())
            .finish_non_exhaustive()
    }
}

/// Builder for [`SessionFactory`].
pub struct SessionFactoryBuilder {
    config: OrmConfig,
    store: Option<Arc<dyn Store>>,
    registry: EntityRegistry,
    error: Option<lazyorm_core::Error>,
}

impl SessionFactoryBuilder {
    /// Use this configuration.
    pub fn config(mut self, config: OrmConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of a fresh [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an entity type.
    ///
    /// The first invalid mapping is reported by [`build`](Self::build).
    pub fn register<M: Model>(mut self) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.registry.register::<M>() {
                self.error = Some(err);
            }
        }
        self
    }

    /// Validate the registrations and create the tables.
    pub fn build(self) -> Result<SessionFactory> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(
                MemoryStore::new().with_foreign_keys(self.config.enforce_foreign_keys),
            ),
        };
        for schema in self.registry.schemas() {
            store.create_table(schema.clone())?;
        }
        tracing::info!(
            tables = self.registry.tables().len(),
            dirty_tracking = %self.config.dirty_tracking,
            "session factory built"
        );
        Ok(SessionFactory {
            statistics: Arc::new(Statistics::new(self.config.generate_statistics)),
            config: self.config,
            store,
            registry: Arc::new(self.registry),
        })
    }
}

impl SessionFactory {
    /// Start building a factory.
    pub fn builder() -> SessionFactoryBuilder {
        SessionFactoryBuilder {
            config: OrmConfig::default(),
            store: None,
            registry: EntityRegistry::new(),
            error: None,
        }
    }

    /// Factory configuration.
    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Registered entity types.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Counters shared by every session of this factory.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Open a session; the caller commits, rolls back or closes it.
    pub fn open_session(&self) -> Session {
        Session::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.statistics),
            self.config.session_config(),
        )
    }

    /// Run `f` in a transaction: commit when it returns `Ok`, roll back
    /// otherwise.
    pub fn in_transaction(&self, f: impl FnOnce(&mut Session) -> Result<()>) -> Result<()> {
        self.from_transaction(f)
    }

    /// Like [`in_transaction`](Self::in_transaction), returning the closure's value.
    #[tracing::instrument(level = "debug", skip(self, f))]
    pub fn from_transaction<R>(&self, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let mut session = self.open_session();
        let outcome = f(&mut session).and_then(|value| {
            if session.state() == SessionState::Active {
                session.commit()?;
            }
            Ok(value)
        });
        if let Err(err) = &outcome {
            tracing::debug!(error = %err, "rolling back");
            if session.state() == SessionState::Active {
                session.rollback()?;
            }
        }
        outcome
    }

    /// Run `f` in a session that is closed afterwards without committing.
    pub fn in_session<R>(&self, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
        let mut session = self.open_session();
        let outcome = f(&mut session);
        session.close();
        outcome
    }

    /// Schema operations on the registered tables.
    pub fn schema_manager(&self) -> SchemaManager<'_> {
        SchemaManager { factory: self }
    }
}

/// Schema operations on a factory's tables.
#[derive(Debug)]
pub struct SchemaManager<'a> {
    factory: &'a SessionFactory,
}

impl SchemaManager<'_> {
    /// Delete every row of every registered table.
    pub fn truncate(&self) -> Result<()> {
        let tables = self.factory.registry.tables();
        self.factory.store.truncate(&tables)?;
        tracing::info!(tables = tables.len(), "schema truncated");
        Ok(())
    }

    /// Row count of one registered table.
    pub fn count(&self, table: &str) -> Result<usize> {
        self.factory.store.count(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyorm_core::error::{Error, SchemaErrorKind};
    use lazyorm_core::{FieldInfo, Row, Value};
    use std::sync::OnceLock;

    #[derive(Debug, Clone)]
    struct Tag {
        id: i64,
        label: String,
    }

    impl Model for Tag {
        const TABLE_NAME: &'static str = "tag";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        type Id = i64;

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: OnceLock<Vec<FieldInfo>> = OnceLock::new();
            FIELDS.get_or_init(|| {
                vec![
                    FieldInfo::of::<i64>("id").primary_key(true),
                    FieldInfo::of::<String>("label"),
                ]
            })
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("id", self.id.into()), ("label", self.label.clone().into())]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
                label: row.get_named("label")?,
            })
        }

        fn primary_key_value(&self) -> Vec<Value> {
            vec![self.id.into()]
        }
    }

    /// Declares a two-column key but identifies with one value.
    struct Mismatched;

    impl Model for Mismatched {
        const TABLE_NAME: &'static str = "mismatched";
        const PRIMARY_KEY: &'static [&'static str] = &["a", "b"];
        type Id = i64;

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: OnceLock<Vec<FieldInfo>> = OnceLock::new();
            FIELDS.get_or_init(|| {
                vec![
                    FieldInfo::of::<i64>("a").primary_key(true),
                    FieldInfo::of::<i64>("b").primary_key(true),
                ]
            })
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            Vec::new()
        }

        fn from_row(_row: &Row) -> Result<Self> {
            Ok(Mismatched)
        }

        fn primary_key_value(&self) -> Vec<Value> {
            Vec::new()
        }
    }

    fn tag(id: i64, label: &str) -> Tag {
        Tag {
            id,
            label: label.to_string(),
        }
    }

    fn factory() -> SessionFactory {
        SessionFactory::builder().register::<Tag>().build().unwrap()
    }

    #[test]
    fn in_transaction_commits_on_ok() {
        let factory = factory();
        factory
            .in_transaction(|session| session.persist(tag(1, "red")).map(drop))
            .unwrap();
        assert_eq!(factory.schema_manager().count("tag").unwrap(), 1);
        let snapshot = factory.statistics().snapshot();
        assert_eq!(snapshot.entity_inserts, 1);
        assert_eq!(snapshot.sessions_opened, snapshot.sessions_closed);
    }

    #[test]
    fn in_transaction_rolls_back_on_err() {
        let factory = factory();
        let err = factory
            .in_transaction(|session| {
                session.persist(tag(1, "red"))?;
                Err(Error::Custom("abort".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Custom(_)));
        assert_eq!(factory.schema_manager().count("tag").unwrap(), 0);
    }

    #[test]
    fn failed_commit_is_reported() {
        let factory = factory();
        factory
            .in_transaction(|session| session.persist(tag(1, "red")).map(drop))
            .unwrap();
        let err = factory
            .in_transaction(|session| session.persist(tag(1, "blue")).map(drop))
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn from_transaction_returns_the_value() {
        let factory = factory();
        factory
            .in_transaction(|session| session.persist(tag(1, "red")).map(drop))
            .unwrap();
        let label = factory
            .from_transaction(|session| {
                let found = session.find::<Tag>(&1)?;
                found.map_or(Ok(String::new()), |t| t.with(|t| t.label.clone()))
            })
            .unwrap();
        assert_eq!(label, "red");
    }

    #[test]
    fn in_session_does_not_commit() {
        let factory = factory();
        factory
            .in_session(|session| session.persist(tag(1, "red")).map(drop))
            .unwrap();
        assert_eq!(factory.schema_manager().count("tag").unwrap(), 0);
    }

    #[test]
    fn truncate_empties_tables() {
        let factory = factory();
        factory
            .in_transaction(|session| {
                session.persist(tag(1, "red"))?;
                session.persist(tag(2, "blue"))?;
                Ok(())
            })
            .unwrap();
        factory.schema_manager().truncate().unwrap();
        assert_eq!(factory.schema_manager().count("tag").unwrap(), 0);
    }

    #[test]
    fn build_rejects_invalid_mapping() {
        let err = SessionFactory::builder()
            .register::<Tag>()
            .register::<Mismatched>()
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::InvalidKey
        ));
    }
}
