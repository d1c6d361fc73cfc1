//! Registered entity types and their table dependencies.

use lazyorm_core::error::{Error, SchemaErrorKind};
use lazyorm_core::{Model, Result, TableSchema, validate_model};
use std::any::TypeId;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Registration {
    type_id: TypeId,
    entity: &'static str,
    schema: TableSchema,
}

/// The set of entity types a session factory manages.
///
/// Registration validates the mapping once; sessions consult the registry
/// to reject unknown entity types and to order flush operations by foreign
/// key dependencies.
#[derive(Debug, Default, Clone)]
pub struct EntityRegistry {
    entries: Vec<Registration>,
    by_type: HashMap<TypeId, usize>,
    by_table: HashMap<&'static str, usize>,
}

impl EntityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register `M`.
    pub fn register<M: Model>(&mut self) -> Result<()> {
        validate_model::<M>()?;
        let type_id = TypeId::of::<M>();
        if self.by_type.contains_key(&type_id) {
            return Ok(());
        }
        if self.by_table.contains_key(M::TABLE_NAME) {
            return Err(Error::schema(
                SchemaErrorKind::TableExists,
                Some(M::entity_name()),
                format!("table '{}' is already mapped", M::TABLE_NAME),
            ));
        }
        let index = self.entries.len();
        self.entries.push(Registration {
            type_id,
            entity: M::entity_name(),
            schema: TableSchema::of::<M>(),
        });
        self.by_type.insert(type_id, index);
        self.by_table.insert(M::TABLE_NAME, index);
        tracing::debug!(entity = M::entity_name(), table = M::TABLE_NAME, "registered entity");
        Ok(())
    }

    /// Fail unless `M` was registered.
    pub fn require<M: Model>(&self) -> Result<()> {
        if self.by_type.contains_key(&TypeId::of::<M>()) {
            Ok(())
        } else {
            Err(Error::schema(
                SchemaErrorKind::UnknownEntity,
                Some(M::entity_name()),
                format!("{} is not a registered entity", M::entity_name()),
            ))
        }
    }

    /// Entity type mapped to `table`.
    pub fn type_of_table(&self, table: &str) -> Option<TypeId> {
        self.by_table.get(table).map(|&i| self.entries[i].type_id)
    }

    /// Entity name mapped to `table`.
    pub fn entity_of_table(&self, table: &str) -> Option<&'static str> {
        self.by_table.get(table).map(|&i| self.entries[i].entity)
    }

    /// Table layouts in registration order.
    pub fn schemas(&self) -> impl Iterator<Item = &TableSchema> {
        self.entries.iter().map(|e| &e.schema)
    }

    /// Registered table names in registration order.
    pub fn tables(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.schema.table).collect()
    }

    /// Length of the longest foreign-key chain starting at `table`.
    ///
    /// Tables that reference nothing have depth 0. Self references and
    /// cycles are cut at the first revisit.
    pub fn depth(&self, table: &str) -> usize {
        let mut visiting = Vec::new();
        self.depth_inner(table, &mut visiting)
    }

    fn depth_inner<'a>(&'a self, table: &'a str, visiting: &mut Vec<&'a str>) -> usize {
        if visiting.contains(&table) {
            return 0;
        }
        let Some(&index) = self.by_table.get(table) else {
            return 0;
        };
        visiting.push(table);
        let depth = self.entries[index]
            .schema
            .columns
            .iter()
            .filter_map(|f| f.foreign_key_target())
            .filter(|(target, _)| *target != table)
            .map(|(target, _)| 1 + self.depth_inner(target, visiting))
            .max()
            .unwrap_or(0);
        visiting.pop();
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyorm_core::{FieldInfo, Row, SqlType, Value};

    macro_rules! table_model {
        ($name:ident, $table:literal, $fields:expr) => {
            struct $name;

            impl Model for $name {
                const TABLE_NAME: &'static str = $table;
                const PRIMARY_KEY: &'static [&'static str] = &["id"];
                type Id = i64;

                fn fields() -> &'static [FieldInfo] {
                    static FIELDS: &[FieldInfo] = $fields;
                    FIELDS
                }

                fn to_row(&self) -> Vec<(&'static str, Value)> {
                    Vec::new()
                }

                fn from_row(_row: &Row) -> Result<Self> {
                    Ok($name)
                }

                fn primary_key_value(&self) -> Vec<Value> {
                    Vec::new()
                }
            }
        };
    }

    table_model!(
        Engine,
        "engine",
        &[FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true)]
    );
    table_model!(
        Car,
        "car",
        &[
            FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true),
            FieldInfo::new("engine", "engine_id", SqlType::BigInt)
                .nullable(true)
                .foreign_key("engine.id"),
        ]
    );
    table_model!(
        Unregistered,
        "other",
        &[FieldInfo::new("id", "id", SqlType::BigInt).primary_key(true)]
    );

    #[test]
    fn depth_follows_foreign_keys() {
        let mut registry = EntityRegistry::new();
        registry.register::<Car>().unwrap();
        registry.register::<Engine>().unwrap();
        registry.register::<Car>().unwrap();

        assert_eq!(registry.depth("engine"), 0);
        assert_eq!(registry.depth("car"), 1);
        assert_eq!(registry.tables(), vec!["car", "engine"]);
        assert_eq!(registry.entity_of_table("car"), Some("Car"));
    }

    #[test]
    fn require_rejects_unknown_types() {
        let mut registry = EntityRegistry::new();
        registry.register::<Engine>().unwrap();
        registry.require::<Engine>().unwrap();
        let err = registry.require::<Unregistered>().unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::UnknownEntity
        ));
    }
}
