//! `MemoryStore` implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazyorm_core::error::{Error, SchemaErrorKind, SessionErrorKind, StoreErrorKind};
use lazyorm_core::{ColumnInfo, Result, Row, Store, StoreOp, TableSchema, Value, VersionCheck};
use parking_lot::RwLock;

/// Primary-key values encoded as a map key.
type RowKey = String;

/// Integer widths compare equal across `Int`/`BigInt`.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Int(v) => Value::BigInt(i64::from(*v)),
        other => other.clone(),
    }
}

fn row_key(pk: &[Value]) -> Result<RowKey> {
    let normalized: Vec<Value> = pk.iter().map(normalize).collect();
    Ok(serde_json::to_string(&normalized)?)
}

#[derive(Debug, Clone)]
struct Table {
    schema: TableSchema,
    columns: Arc<ColumnInfo>,
    rows: BTreeMap<RowKey, Vec<Value>>,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        let columns = Arc::new(ColumnInfo::new(schema.column_names()));
        Self {
            schema,
            columns,
            rows: BTreeMap::new(),
        }
    }

    fn to_row(&self, values: &[Value]) -> Row {
        Row::with_columns(Arc::clone(&self.columns), values.to_vec())
    }

    fn key_of(&self, values: &[Value]) -> Result<RowKey> {
        let pk: Vec<Value> = self
            .schema
            .primary_key_indices()
            .into_iter()
            .map(|i| values[i].clone())
            .collect();
        row_key(&pk)
    }

    fn index_of(&self, column: &str) -> Result<usize> {
        self.columns.index_of(column).ok_or_else(|| {
            Error::store(
                StoreErrorKind::Constraint,
                self.schema.table,
                format!("no column '{}'", column),
            )
        })
    }

    /// Check NOT NULL and type constraints of one column value.
    fn check_value(&self, index: usize, value: &Value) -> Result<()> {
        let field = &self.schema.columns[index];
        if value.is_null() && !field.nullable {
            return Err(Error::store(
                StoreErrorKind::Constraint,
                self.schema.table,
                format!("NOT NULL constraint failed: {}", field.column_name),
            ));
        }
        if !field.sql_type.accepts(value) {
            return Err(Error::store(
                StoreErrorKind::Constraint,
                self.schema.table,
                format!(
                    "column '{}' of type {} cannot hold {}",
                    field.column_name,
                    field.sql_type.sql_name(),
                    value.type_name()
                ),
            ));
        }
        Ok(())
    }

    fn check_version(&self, stored: &[Value], version: Option<&VersionCheck>) -> Result<()> {
        let Some(check) = version else {
            return Ok(());
        };
        let index = self.index_of(check.column)?;
        if normalize(&stored[index]) != normalize(&check.expected) {
            return Err(Error::session(
                SessionErrorKind::StaleState,
                self.schema.table,
                format!(
                    "row was updated or deleted by another transaction ({} is {:?}, expected {:?})",
                    check.column, stored[index], check.expected
                ),
            ));
        }
        Ok(())
    }
}

type Tables = BTreeMap<&'static str, Table>;

/// An in-memory [`Store`].
///
/// Rows live in per-table ordered maps keyed by their structural primary
/// key. Batches are applied to a copy of the tables and swapped in only
/// when every operation succeeded.
///
/// # Cost
///
/// Every [`apply`](Store::apply) clones all tables before staging, so a
/// batch costs time and memory proportional to the whole store, not to
/// the rows it touches. This suits tests and small data sets; a store
/// holding many rows should implement [`Store`] with a real undo log or
/// transaction instead.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    enforce_foreign_keys: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store that enforces foreign keys.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            enforce_foreign_keys: true,
        }
    }

    /// Enable or disable foreign key checks.
    pub fn with_foreign_keys(mut self, enforce: bool) -> Self {
        self.enforce_foreign_keys = enforce;
        self
    }

    /// Every row of `table`, in key order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let tables = self.tables.read();
        let t = table_ref(&tables, table)?;
        Ok(t.rows.values().map(|v| t.to_row(v)).collect())
    }

    /// Registered table names.
    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.read().keys().copied().collect()
    }

    fn apply_one(&self, tables: &mut Tables, op: &StoreOp) -> Result<()> {
        match op {
            StoreOp::Insert { table, row } => {
                let t = table_mut(tables, table)?;
                let mut values = vec![Value::Null; t.schema.columns.len()];
                for (name, value) in row.iter() {
                    values[t.index_of(name)?] = value.clone();
                }
                for (i, value) in values.iter().enumerate() {
                    t.check_value(i, value)?;
                }
                let key = t.key_of(&values)?;
                if t.rows.contains_key(&key) {
                    return Err(Error::store(
                        StoreErrorKind::DuplicateKey,
                        table,
                        format!("duplicate primary key {}", key),
                    ));
                }
                t.rows.insert(key, values.clone());
                self.check_outgoing(tables, table, &values, None)
            }
            StoreOp::Update {
                table,
                pk,
                changes,
                version,
            } => {
                let key = row_key(pk)?;
                let t = table_mut(tables, table)?;
                let Some(stored) = t.rows.get(&key).cloned() else {
                    return Err(missing_row(table, &key));
                };
                t.check_version(&stored, version.as_ref())?;
                let mut updated = stored;
                let mut touched = Vec::with_capacity(changes.len());
                for (column, value) in changes {
                    if t.schema.primary_key.contains(column) {
                        return Err(Error::store(
                            StoreErrorKind::Constraint,
                            table,
                            format!("primary key column '{}' cannot be updated", column),
                        ));
                    }
                    let i = t.index_of(column)?;
                    t.check_value(i, value)?;
                    updated[i] = value.clone();
                    touched.push(i);
                }
                t.rows.insert(key, updated.clone());
                self.check_outgoing(tables, table, &updated, Some(&touched))
            }
            StoreOp::Delete { table, pk, version } => {
                let key = row_key(pk)?;
                let t = table_mut(tables, table)?;
                let Some(stored) = t.rows.get(&key) else {
                    return Err(missing_row(table, &key));
                };
                t.check_version(stored, version.as_ref())?;
                let stored = stored.clone();
                t.rows.remove(&key);
                self.check_incoming(tables, table, &stored)
            }
        }
    }

    /// Every non-null foreign key of `values` must reference an existing row.
    ///
    /// With `only` set, just those column indices are checked.
    fn check_outgoing(
        &self,
        tables: &Tables,
        table: &str,
        values: &[Value],
        only: Option<&[usize]>,
    ) -> Result<()> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }
        let t = table_ref(tables, table)?;
        for (i, field) in t.schema.columns.iter().enumerate() {
            if only.is_some_and(|cols| !cols.contains(&i)) || values[i].is_null() {
                continue;
            }
            let Some((target_table, target_column)) = field.foreign_key_target() else {
                continue;
            };
            let target = table_ref(tables, target_table)?;
            if !references_exist(target, target_column, &values[i])? {
                return Err(Error::store(
                    StoreErrorKind::ForeignKey,
                    table,
                    format!(
                        "FOREIGN KEY constraint failed: {}={:?} has no row in {}",
                        field.column_name, values[i], target_table
                    ),
                ));
            }
        }
        Ok(())
    }

    /// No row may still reference the deleted `values` of `table`.
    fn check_incoming(&self, tables: &Tables, table: &str, values: &[Value]) -> Result<()> {
        if !self.enforce_foreign_keys {
            return Ok(());
        }
        let deleted = table_ref(tables, table)?;
        for other in tables.values() {
            for (i, field) in other.schema.columns.iter().enumerate() {
                let Some((target_table, target_column)) = field.foreign_key_target() else {
                    continue;
                };
                if target_table != table {
                    continue;
                }
                let referenced = normalize(&values[deleted.index_of(target_column)?]);
                if other.rows.values().any(|row| normalize(&row[i]) == referenced) {
                    return Err(Error::store(
                        StoreErrorKind::ForeignKey,
                        table,
                        format!(
                            "FOREIGN KEY constraint failed: row still referenced by {}.{}",
                            other.schema.table, field.column_name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn missing_row(table: &str, key: &str) -> Error {
    Error::store(
        StoreErrorKind::NotFound,
        table,
        format!("no row with primary key {}", key),
    )
}

fn table_ref<'a>(tables: &'a Tables, table: &str) -> Result<&'a Table> {
    tables.get(table).ok_or_else(|| {
        Error::store(
            StoreErrorKind::TableNotFound,
            table,
            format!("no such table: {}", table),
        )
    })
}

fn table_mut<'a>(tables: &'a mut Tables, table: &str) -> Result<&'a mut Table> {
    tables.get_mut(table).ok_or_else(|| {
        Error::store(
            StoreErrorKind::TableNotFound,
            table,
            format!("no such table: {}", table),
        )
    })
}

fn references_exist(target: &Table, column: &str, value: &Value) -> Result<bool> {
    if target.schema.primary_key == [column] {
        return Ok(target.rows.contains_key(&row_key(std::slice::from_ref(value))?));
    }
    let i = target.index_of(column)?;
    let wanted = normalize(value);
    Ok(target.rows.values().any(|row| normalize(&row[i]) == wanted))
}

impl Store for MemoryStore {
    fn create_table(&self, schema: TableSchema) -> Result<()> {
        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(schema.table) {
            if existing.schema == schema {
                return Ok(());
            }
            return Err(Error::schema(
                SchemaErrorKind::TableExists,
                None,
                format!("table '{}' already exists with another layout", schema.table),
            ));
        }
        tracing::debug!(
            table = schema.table,
            columns = schema.columns.len(),
            "create table"
        );
        tables.insert(schema.table, Table::new(schema));
        Ok(())
    }

    fn load(&self, table: &str, pk: &[Value]) -> Result<Option<Row>> {
        let key = row_key(pk)?;
        let tables = self.tables.read();
        let t = table_ref(&tables, table)?;
        tracing::trace!(table, key = %key, "load");
        Ok(t.rows.get(&key).map(|values| t.to_row(values)))
    }

    fn select_by(&self, table: &str, column: &str, value: &Value) -> Result<Vec<Row>> {
        let tables = self.tables.read();
        let t = table_ref(&tables, table)?;
        let i = t.index_of(column)?;
        let wanted = normalize(value);
        Ok(t
            .rows
            .values()
            .filter(|row| normalize(&row[i]) == wanted)
            .map(|row| t.to_row(row))
            .collect())
    }

    fn apply(&self, ops: &[StoreOp]) -> Result<()> {
        let mut guard = self.tables.write();
        let mut staged = guard.clone();
        for op in ops {
            tracing::trace!(statement = %op, "apply");
            if let Err(e) = self.apply_one(&mut staged, op) {
                tracing::debug!(error = %e, statement = %op, "batch rejected");
                return Err(e);
            }
        }
        *guard = staged;
        Ok(())
    }

    fn truncate(&self, tables: &[&str]) -> Result<()> {
        let mut guard = self.tables.write();
        for table in tables {
            table_mut(&mut guard, table)?;
        }
        for table in tables {
            if let Some(t) = guard.get_mut(*table) {
                t.rows.clear();
            }
        }
        tracing::debug!(tables = tables.len(), "truncated");
        Ok(())
    }

    fn count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read();
        Ok(table_ref(&tables, table)?.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyorm_core::{FieldInfo, SqlType};

    const ENGINE: &[&str] = &["id"];
    const CAR: &[&str] = &["id"];

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table(TableSchema {
                table: "engine",
                columns: vec![
                    FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                    FieldInfo::new("hp", "hp", SqlType::Integer),
                ],
                primary_key: ENGINE,
            })
            .unwrap();
        store
            .create_table(TableSchema {
                table: "car",
                columns: vec![
                    FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
                    FieldInfo::new("engine", "engine_id", SqlType::BigInt)
                        .nullable(true)
                        .foreign_key("engine.id"),
                    FieldInfo::new("version", "version", SqlType::BigInt).version(true),
                ],
                primary_key: CAR,
            })
            .unwrap();
        store
    }

    fn insert_engine(id: i64) -> StoreOp {
        StoreOp::Insert {
            table: "engine",
            row: Row::from_pairs(vec![("id", id.into()), ("hp", Value::Int(90))]),
        }
    }

    fn insert_car(id: i64, engine: Value) -> StoreOp {
        StoreOp::Insert {
            table: "car",
            row: Row::from_pairs(vec![
                ("id", id.into()),
                ("engine_id", engine),
                ("version", Value::BigInt(0)),
            ]),
        }
    }

    #[test]
    fn insert_and_load_across_integer_widths() {
        let store = store();
        store
            .apply(&[insert_engine(1), insert_car(1, Value::Int(1))])
            .unwrap();
        let row = store.load("car", &[Value::Int(1)]).unwrap().unwrap();
        assert_eq!(row.get_named::<i64>("engine_id").unwrap(), 1);
        assert_eq!(store.count("car").unwrap(), 1);
        assert_eq!(
            store
                .select_by("car", "engine_id", &Value::BigInt(1))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn failing_batch_leaves_tables_untouched() {
        let store = store();
        let err = store
            .apply(&[insert_engine(1), insert_car(1, Value::BigInt(2))])
            .unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::ForeignKey));
        assert_eq!(store.count("engine").unwrap(), 0);
    }

    #[test]
    fn delete_restricted_while_referenced() {
        let store = store();
        store
            .apply(&[insert_engine(1), insert_car(1, Value::BigInt(1))])
            .unwrap();
        let delete_engine = StoreOp::Delete {
            table: "engine",
            pk: vec![Value::BigInt(1)],
            version: None,
        };
        let err = store.apply(std::slice::from_ref(&delete_engine)).unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::ForeignKey));

        // Clearing the reference first makes the delete legal in one batch.
        let clear = StoreOp::Update {
            table: "car",
            pk: vec![Value::BigInt(1)],
            changes: vec![("engine_id", Value::Null)],
            version: None,
        };
        store.apply(&[clear, delete_engine]).unwrap();
        assert_eq!(store.count("engine").unwrap(), 0);
    }

    #[test]
    fn duplicate_and_missing_rows() {
        let store = store();
        store.apply(&[insert_engine(1)]).unwrap();
        let err = store.apply(&[insert_engine(1)]).unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::DuplicateKey));

        let err = store
            .apply(&[StoreOp::Delete {
                table: "engine",
                pk: vec![Value::BigInt(9)],
                version: None,
            }])
            .unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::NotFound));

        let err = store.load("wheel", &[Value::BigInt(1)]).unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::TableNotFound));
    }

    #[test]
    fn version_mismatch_is_stale_state() {
        let store = store();
        store
            .apply(&[insert_engine(1), insert_car(1, Value::Null)])
            .unwrap();
        let stale = StoreOp::Update {
            table: "car",
            pk: vec![Value::BigInt(1)],
            changes: vec![("version", Value::BigInt(6))],
            version: Some(VersionCheck {
                column: "version",
                expected: Value::BigInt(5),
            }),
        };
        let err = store.apply(&[stale]).unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::StaleState));
    }

    #[test]
    fn not_null_and_truncate() {
        let store = store();
        let err = store
            .apply(&[StoreOp::Insert {
                table: "engine",
                row: Row::from_pairs(vec![("id", Value::BigInt(1))]),
            }])
            .unwrap_err();
        assert_eq!(err.store_kind(), Some(StoreErrorKind::Constraint));

        store
            .apply(&[insert_engine(1), insert_car(1, Value::BigInt(1))])
            .unwrap();
        store.truncate(&["car", "engine"]).unwrap();
        assert_eq!(store.count("car").unwrap(), 0);
        assert_eq!(store.count("engine").unwrap(), 0);
        assert!(store.truncate(&["wheel"]).is_err());
    }

    #[test]
    fn foreign_keys_can_be_disabled() {
        let store = store().with_foreign_keys(false);
        store.apply(&[insert_car(1, Value::BigInt(42))]).unwrap();
        assert_eq!(store.rows("car").unwrap().len(), 1);
        assert_eq!(store.table_names(), vec!["car", "engine"]);
    }
}
