//! Backing-store seam.
//!
//! The session never talks to storage directly: it reads rows by key and
//! hands a batch of [`StoreOp`]s to [`Store::apply`] at flush.

use crate::Result;
use crate::field::FieldInfo;
use crate::model::Model;
use crate::row::Row;
use crate::value::Value;
use std::fmt;

/// Table layout handed to [`Store::create_table`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: Vec<FieldInfo>,
    pub primary_key: &'static [&'static str],
}

impl TableSchema {
    /// Derive the table layout from a model's metadata.
    pub fn of<M: Model>() -> Self {
        Self {
            table: M::TABLE_NAME,
            columns: M::fields().to_vec(),
            primary_key: M::PRIMARY_KEY,
        }
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|f| f.column_name.to_string())
            .collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&FieldInfo> {
        self.columns.iter().find(|f| f.column_name == name)
    }

    /// Index of each primary-key column within `columns`.
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|pk| self.columns.iter().position(|f| f.column_name == *pk))
            .collect()
    }
}

/// Expected value of a version column, checked before an update or delete.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionCheck {
    pub column: &'static str,
    pub expected: Value,
}

/// One write in a flush batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Insert a full row.
    Insert { table: &'static str, row: Row },
    /// Assign `changes` on the row identified by `pk`.
    Update {
        table: &'static str,
        pk: Vec<Value>,
        changes: Vec<(&'static str, Value)>,
        version: Option<VersionCheck>,
    },
    /// Delete the row identified by `pk`.
    Delete {
        table: &'static str,
        pk: Vec<Value>,
        version: Option<VersionCheck>,
    },
}

impl StoreOp {
    /// Table this operation targets.
    pub fn table(&self) -> &'static str {
        match self {
            StoreOp::Insert { table, .. }
            | StoreOp::Update { table, .. }
            | StoreOp::Delete { table, .. } => *table,
        }
    }

    /// Statement verb, for logs and statistics.
    pub fn verb(&self) -> &'static str {
        match self {
            StoreOp::Insert { .. } => "insert",
            StoreOp::Update { .. } => "update",
            StoreOp::Delete { .. } => "delete",
        }
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Renders the SQL-shaped statement an operation stands for.
///
/// Used for statement logging only; the in-memory store never parses it.
impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::Insert { table, row } => {
                let cols: Vec<_> = row.column_names().collect();
                write!(
                    f,
                    "insert into {} ({}) values ({})",
                    table,
                    cols.join(", "),
                    placeholders(cols.len())
                )
            }
            StoreOp::Update {
                table,
                changes,
                version,
                ..
            } => {
                let sets: Vec<_> = changes.iter().map(|(c, _)| format!("{c}=?")).collect();
                write!(f, "update {} set {} where <pk>", table, sets.join(", "))?;
                if let Some(v) = version {
                    write!(f, " and {}=?", v.column)?;
                }
                Ok(())
            }
            StoreOp::Delete { table, version, .. } => {
                write!(f, "delete from {} where <pk>", table)?;
                if let Some(v) = version {
                    write!(f, " and {}=?", v.column)?;
                }
                Ok(())
            }
        }
    }
}

/// A backing store holding one table per registered entity.
///
/// Implementations must apply a batch atomically: either every operation
/// in `apply` takes effect or none does.
pub trait Store: Send + Sync + fmt::Debug {
    /// Register a table.
    fn create_table(&self, schema: TableSchema) -> Result<()>;

    /// Load one row by primary key values.
    fn load(&self, table: &str, pk: &[Value]) -> Result<Option<Row>>;

    /// Load every row whose `column` equals `value`.
    fn select_by(&self, table: &str, column: &str, value: &Value) -> Result<Vec<Row>>;

    /// Apply a batch of writes atomically.
    fn apply(&self, ops: &[StoreOp]) -> Result<()>;

    /// Remove every row of the given tables.
    fn truncate(&self, tables: &[&str]) -> Result<()>;

    /// Number of rows currently in `table`.
    fn count(&self, table: &str) -> Result<usize>;
}
