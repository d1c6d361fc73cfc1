//! Mapping validation run when an entity type is registered.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, SchemaErrorKind};
use crate::model::{Identifier, Model};
use crate::relationship::RelationshipKind;
use crate::types::SqlType;
use crate::Result;

fn identifier_regex() -> Option<&'static Regex> {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
}

/// Check that `name` can be used as a table or column name.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_some_and(|re| re.is_match(name))
}

/// Validate the static mapping of `M`.
///
/// Checks that:
/// - table and column names are plain identifiers and columns are unique
/// - every primary-key column is declared (own or inherited) and flagged
/// - the identifier type covers exactly the primary-key columns
/// - at most one integer version column exists
/// - owning relationships name a declared foreign-key column and inverse
///   relationships carry no column
pub fn validate_model<M: Model>() -> Result<()> {
    let entity = Some(M::entity_name());
    let invalid = |kind, message: String| Err(Error::schema(kind, entity, message));

    if !is_valid_identifier(M::TABLE_NAME) {
        return invalid(
            SchemaErrorKind::InvalidName,
            format!("'{}' is not a valid table name", M::TABLE_NAME),
        );
    }

    let mut seen = HashSet::new();
    for field in M::fields() {
        if !is_valid_identifier(field.column_name) {
            return invalid(
                SchemaErrorKind::InvalidName,
                format!("'{}' is not a valid column name", field.column_name),
            );
        }
        if !seen.insert(field.column_name) {
            return invalid(
                SchemaErrorKind::InvalidName,
                format!("column '{}' declared twice", field.column_name),
            );
        }
    }

    if M::PRIMARY_KEY.is_empty() {
        return invalid(
            SchemaErrorKind::InvalidKey,
            format!("{} declares no primary key", M::TABLE_NAME),
        );
    }
    for pk in M::PRIMARY_KEY {
        match M::fields().iter().find(|f| f.column_name == *pk) {
            Some(field) if field.primary_key && !field.nullable => {}
            Some(_) => {
                return invalid(
                    SchemaErrorKind::InvalidKey,
                    format!("column '{}' must be a non-null primary key field", pk),
                );
            }
            None => {
                return invalid(
                    SchemaErrorKind::InvalidKey,
                    format!("primary key column '{}' is not declared", pk),
                );
            }
        }
    }
    let flagged = M::fields().iter().filter(|f| f.primary_key).count();
    if flagged != M::PRIMARY_KEY.len() {
        return invalid(
            SchemaErrorKind::InvalidKey,
            format!(
                "{} field(s) flagged primary key but PRIMARY_KEY lists {}",
                flagged,
                M::PRIMARY_KEY.len()
            ),
        );
    }
    if <M::Id as Identifier>::ARITY != M::PRIMARY_KEY.len() {
        return invalid(
            SchemaErrorKind::InvalidKey,
            format!(
                "identifier {} has {} component(s) but the key has {} column(s)",
                std::any::type_name::<M::Id>(),
                <M::Id as Identifier>::ARITY,
                M::PRIMARY_KEY.len()
            ),
        );
    }

    let versions: Vec<_> = M::fields().iter().filter(|f| f.version).collect();
    if versions.len() > 1 {
        return invalid(
            SchemaErrorKind::InvalidKey,
            "more than one version column".to_string(),
        );
    }
    if let Some(v) = versions.first() {
        if !matches!(v.sql_type, SqlType::Integer | SqlType::BigInt) {
            return invalid(
                SchemaErrorKind::InvalidKey,
                format!("version column '{}' must be an integer", v.column_name),
            );
        }
    }

    for rel in M::RELATIONSHIPS {
        match (rel.local_key, rel.mapped_by) {
            (Some(_), Some(_)) => {
                return invalid(
                    SchemaErrorKind::InvalidRelationship,
                    format!("relationship '{}' cannot be both owning and inverse", rel.name),
                );
            }
            (None, None) => {
                return invalid(
                    SchemaErrorKind::InvalidRelationship,
                    format!("relationship '{}' needs a local key or mapped_by", rel.name),
                );
            }
            (Some(key), None) => {
                let Some(field) = M::fields().iter().find(|f| f.column_name == key) else {
                    return invalid(
                        SchemaErrorKind::InvalidRelationship,
                        format!("relationship '{}' names unknown column '{}'", rel.name, key),
                    );
                };
                let target = field.foreign_key_target().map(|(table, _)| table);
                if let Some(table) = target.filter(|t| *t != rel.related_table) {
                    return invalid(
                        SchemaErrorKind::InvalidRelationship,
                        format!(
                            "column '{}' references '{}' but relationship '{}' targets '{}'",
                            key, table, rel.name, rel.related_table
                        ),
                    );
                }
            }
            (None, Some(_)) => {
                if rel.orphan_removal || rel.kind != RelationshipKind::OneToOne {
                    return invalid(
                        SchemaErrorKind::InvalidRelationship,
                        format!(
                            "inverse relationship '{}' must be a plain one-to-one",
                            rel.name
                        ),
                    );
                }
            }
        }
    }

    tracing::trace!(
        table = M::TABLE_NAME,
        columns = M::fields().len(),
        "entity mapping validated"
    );
    Ok(())
}
