//! Model trait for entity-to-row mapping.
//!
//! The `Model` trait defines the contract for structs that can be
//! managed by a session. Identifiers implement [`Identifier`]; persistent
//! state shared by several entities lives in a [`MappedSuperclass`].

use crate::Result;
use crate::error::{Error, TypeError};
use crate::field::FieldInfo;
use crate::relationship::RelationshipInfo;
use crate::row::Row;
use crate::value::Value;
use std::fmt;

/// An entity identifier: a scalar key or a composite id class.
///
/// Composite id classes derive `PartialEq`, `Eq` and `Hash` so equality is
/// structural over every component. `pk_values` must yield the components in
/// the entity's `PRIMARY_KEY` column order.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// struct CompositeIdClass { oid: i64, my_id: String }
///
/// impl Identifier for CompositeIdClass {
///     const ARITY: usize = 2;
///     fn pk_values(&self) -> Vec<Value> {
///         vec![Value::BigInt(self.oid), Value::Text(self.my_id.clone())]
///     }
/// }
/// ```
pub trait Identifier: fmt::Debug + Send + Sync {
    /// Number of primary-key columns this identifier covers.
    const ARITY: usize;

    /// Component values in primary-key column order.
    fn pk_values(&self) -> Vec<Value>;
}

macro_rules! scalar_identifier {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Identifier for $ty {
                const ARITY: usize = 1;

                fn pk_values(&self) -> Vec<Value> {
                    vec![Value::from(self.clone())]
                }
            }
        )*
    };
}

scalar_identifier!(i32, i64, String, Value);

impl Identifier for &str {
    const ARITY: usize = 1;

    fn pk_values(&self) -> Vec<Value> {
        vec![Value::from(*self)]
    }
}

/// Trait for entity types mapped to a table.
///
/// # Example
///
/// ```ignore
/// impl Model for Animal {
///     const TABLE_NAME: &'static str = "animal";
///     const PRIMARY_KEY: &'static [&'static str] = &["name"];
///     type Id = String;
///
///     fn fields() -> &'static [FieldInfo] { &ANIMAL_FIELDS }
///     fn to_row(&self) -> Vec<(&'static str, Value)> { ... }
///     fn from_row(row: &Row) -> Result<Self> { ... }
///     fn primary_key_value(&self) -> Vec<Value> { vec![self.name.clone().into()] }
/// }
/// ```
pub trait Model: Sized + Send + Sync + 'static {
    /// The name of the database table.
    const TABLE_NAME: &'static str;

    /// The primary key column name(s), inherited columns included.
    const PRIMARY_KEY: &'static [&'static str];

    /// Relationship metadata for this model.
    const RELATIONSHIPS: &'static [RelationshipInfo] = &[];

    /// Identifier type accepted by `find` and `get_reference`.
    type Id: Identifier;

    /// Get field metadata for all columns, inherited columns first.
    fn fields() -> &'static [FieldInfo];

    /// Convert this model instance to a row of values.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct a model instance from a database row.
    fn from_row(row: &Row) -> Result<Self>;

    /// Get the value of the primary key field(s).
    fn primary_key_value(&self) -> Vec<Value>;

    /// Short entity name used in errors and logs.
    fn entity_name() -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }

    /// Assign a single column.
    ///
    /// The default implementation round-trips through `to_row`/`from_row`;
    /// entities with many columns may override it with a direct match.
    fn set_value(&mut self, column: &str, value: Value) -> Result<()> {
        let mut row = Row::from_pairs(self.to_row());
        row.set(column, value)?;
        *self = Self::from_row(&row)?;
        Ok(())
    }

    /// Read a single column.
    fn column_value(&self, column: &str) -> Option<Value> {
        self.to_row()
            .into_iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    /// The optimistic-lock version column, if any.
    fn version_column() -> Option<&'static str> {
        Self::fields()
            .iter()
            .find(|f| f.version)
            .map(|f| f.column_name)
    }
}

/// Check that an identifier has the width of `M`'s primary key and return its values.
pub fn id_values<M: Model>(id: &M::Id) -> Result<Vec<Value>> {
    let values = id.pk_values();
    if values.len() != M::PRIMARY_KEY.len() {
        return Err(Error::Type(TypeError {
            expected: "identifier matching the primary key width",
            actual: format!(
                "{} value(s) for {} key column(s) of {}",
                values.len(),
                M::PRIMARY_KEY.len(),
                M::TABLE_NAME
            ),
            column: None,
            rust_type: Some(std::any::type_name::<M::Id>()),
        }));
    }
    Ok(values)
}

/// Copy an entity through its row form.
pub fn copy_model<M: Model>(model: &M) -> Result<M> {
    M::from_row(&Row::from_pairs(model.to_row()))
}

/// Persistent state declared on a non-entity base type.
///
/// A mapped superclass has no table of its own. Entities embed it and list
/// its fields ahead of their own, so inherited columns (including partial
/// primary keys and version counters) take part in every row.
pub trait MappedSuperclass: Sized + Send + Sync {
    /// Fields contributed to every inheriting entity.
    fn fields() -> &'static [FieldInfo];

    /// Values of the inherited columns.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Rebuild the inherited part from an entity row.
    fn from_row(row: &Row) -> Result<Self>;
}

/// Concatenate inherited fields ahead of an entity's own fields.
///
/// Entities typically cache the result in a `OnceLock<Vec<FieldInfo>>` so
/// `Model::fields` can hand out a `'static` slice.
pub fn inherit_fields<S: MappedSuperclass>(own: &[FieldInfo]) -> Vec<FieldInfo> {
    S::fields().iter().chain(own).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;
    use std::sync::OnceLock;

    #[derive(Debug, Clone, PartialEq)]
    struct Stamped {
        oid: i64,
        tanum: i64,
    }

    impl MappedSuperclass for Stamped {
        fn fields() -> &'static [FieldInfo] {
            static FIELDS: [FieldInfo; 2] = [
                FieldInfo::new("oid", "oid", SqlType::BigInt).primary_key(true),
                FieldInfo::new("tanum", "tanum", SqlType::BigInt).version(true),
            ];
            &FIELDS
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            vec![("oid", self.oid.into()), ("tanum", self.tanum.into())]
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                oid: row.get_named("oid")?,
                tanum: row.get_named("tanum")?,
            })
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct WidgetId {
        oid: i64,
        code: String,
    }

    impl Identifier for WidgetId {
        const ARITY: usize = 2;

        fn pk_values(&self) -> Vec<Value> {
            vec![self.oid.into(), self.code.clone().into()]
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Widget {
        base: Stamped,
        code: String,
        label: Option<String>,
    }

    impl Model for Widget {
        const TABLE_NAME: &'static str = "widget";
        const PRIMARY_KEY: &'static [&'static str] = &["oid", "code"];
        type Id = WidgetId;

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: OnceLock<Vec<FieldInfo>> = OnceLock::new();
            FIELDS.get_or_init(|| {
                inherit_fields::<Stamped>(&[
                    FieldInfo::new("code", "code", SqlType::Text).primary_key(true),
                    FieldInfo::of::<Option<String>>("label"),
                ])
            })
        }

        fn to_row(&self) -> Vec<(&'static str, Value)> {
            let mut row = self.base.to_row();
            row.push(("code", self.code.clone().into()));
            row.push(("label", self.label.clone().into()));
            row
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                base: Stamped::from_row(row)?,
                code: row.get_named("code")?,
                label: row.get_named("label")?,
            })
        }

        fn primary_key_value(&self) -> Vec<Value> {
            vec![self.base.oid.into(), self.code.clone().into()]
        }
    }

    fn widget() -> Widget {
        Widget {
            base: Stamped { oid: 1, tanum: 0 },
            code: "w".to_string(),
            label: None,
        }
    }

    #[test]
    fn inherited_fields_come_first() {
        let names: Vec<_> = Widget::fields().iter().map(|f| f.column_name).collect();
        assert_eq!(names, vec!["oid", "tanum", "code", "label"]);
        assert_eq!(Widget::version_column(), Some("tanum"));
        assert_eq!(Widget::entity_name(), "Widget");
    }

    #[test]
    fn default_set_value_round_trips() {
        let mut w = widget();
        w.set_value("label", Value::from("blue")).unwrap();
        assert_eq!(w.label.as_deref(), Some("blue"));
        w.set_value("tanum", Value::BigInt(3)).unwrap();
        assert_eq!(w.base.tanum, 3);
        assert!(w.set_value("missing", Value::Null).is_err());
        assert_eq!(w.column_value("code"), Some(Value::from("w")));
    }

    #[test]
    fn id_values_checks_width() {
        let id = WidgetId {
            oid: 1,
            code: "w".to_string(),
        };
        assert_eq!(id_values::<Widget>(&id).unwrap().len(), 2);
        assert_eq!(<&str as Identifier>::ARITY, 1);
        assert_eq!(copy_model(&widget()).unwrap(), widget());
    }
}
