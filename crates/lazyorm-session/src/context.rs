//! State shared by a session and the handles it hands out.

use crate::SessionConfig;
use crate::statistics::Statistics;
use lazyorm_core::{Result, Row, Store, Value};
use std::fmt;
use std::sync::Arc;

/// Store access used by a session and by lazy handles while attached.
///
/// Handles hold an `Arc` to this context until their session ends; an
/// uninitialized handle without one cannot load its row.
pub struct SessionContext {
    store: Arc<dyn Store>,
    statistics: Arc<Statistics>,
    config: SessionConfig,
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    pub(crate) fn new(
        store: Arc<dyn Store>,
        statistics: Arc<Statistics>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            statistics,
            config,
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Read one row by key, counting it as an entity load.
    pub(crate) fn load_row(&self, table: &'static str, pk: &[Value]) -> Result<Option<Row>> {
        if self.config.log_statements {
            tracing::info!(target: "lazyorm::sql", "select * from {} where <pk> -- {:?}", table, pk);
        }
        let row = self.store.load(table, pk)?;
        if row.is_some() {
            self.statistics.record_load();
        }
        Ok(row)
    }

    /// Read every row of `table` whose `column` equals `value`.
    pub(crate) fn select_by(
        &self,
        table: &'static str,
        column: &str,
        value: &Value,
    ) -> Result<Vec<Row>> {
        if self.config.log_statements {
            tracing::info!(target: "lazyorm::sql", "select * from {} where {}=? -- {:?}", table, column, value);
        }
        self.store.select_by(table, column, value)
    }
}
