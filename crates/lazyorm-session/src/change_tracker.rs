//! Change tracking and dirty detection.
//!
//! Two strategies are supported. Inline tracking records a column the moment
//! a setter writes it, without comparing values, so redundant writes still
//! count. Snapshot tracking keeps the row as loaded and diffs it against the
//! current state at flush, so only columns whose values changed are written.

use lazyorm_core::error::ConfigError;
use lazyorm_core::{Error, FieldInfo, Row};
use std::fmt;
use std::str::FromStr;

/// How a session decides which columns of a managed entity are dirty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DirtyTracking {
    /// Record each setter call as it happens.
    #[default]
    Inline,
    /// Diff against the loaded row at flush time.
    Snapshot,
}

impl DirtyTracking {
    /// Configuration spelling of this mode.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DirtyTracking::Inline => "inline",
            DirtyTracking::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for DirtyTracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirtyTracking {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DirtyTracking::Inline),
            "snapshot" => Ok(DirtyTracking::Snapshot),
            other => Err(Error::Config(ConfigError {
                message: format!("unknown dirty tracking mode '{}' (expected inline or snapshot)", other),
                source: None,
            })),
        }
    }
}

/// Column-level change record of one entity instance.
#[derive(Debug, Default, Clone)]
pub struct ChangeTracker {
    recorded: Vec<&'static str>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write to `column`.
    pub fn record(&mut self, column: &'static str) {
        if !self.recorded.contains(&column) {
            tracing::trace!(column, "marked dirty");
            self.recorded.push(column);
        }
    }

    /// Columns recorded since the last flush, in write order.
    pub fn recorded(&self) -> &[&'static str] {
        &self.recorded
    }

    /// Check whether anything was recorded.
    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }

    /// Forget recorded writes.
    pub fn clear(&mut self) {
        self.recorded.clear();
    }

    /// Columns to write at flush, in field order.
    ///
    /// Primary-key and version columns are never reported: keys are
    /// immutable and versions are managed by the flush itself. Without a
    /// baseline every other column counts as changed in snapshot mode.
    pub fn dirty_columns(
        &self,
        mode: DirtyTracking,
        fields: &'static [FieldInfo],
        current: &Row,
        baseline: Option<&Row>,
    ) -> Vec<&'static str> {
        fields
            .iter()
            .filter(|f| !f.primary_key && !f.version)
            .filter(|f| match mode {
                DirtyTracking::Inline => self.recorded.contains(&f.column_name),
                DirtyTracking::Snapshot => baseline.is_none_or(|b| {
                    b.get_by_name(f.column_name) != current.get_by_name(f.column_name)
                }),
            })
            .map(|f| f.column_name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazyorm_core::{SqlType, Value};

    static FIELDS: [FieldInfo; 4] = [
        FieldInfo::new("name", "name", SqlType::Text).primary_key(true),
        FieldInfo::new("age", "age", SqlType::Integer),
        FieldInfo::new("color", "color", SqlType::Text).nullable(true),
        FieldInfo::new("version", "version", SqlType::BigInt).version(true),
    ];

    fn row(age: i32, color: &str) -> Row {
        Row::from_pairs(vec![
            ("name", "Ella".into()),
            ("age", Value::Int(age)),
            ("color", color.into()),
            ("version", Value::BigInt(0)),
        ])
    }

    #[test]
    fn inline_reports_redundant_writes() {
        let mut tracker = ChangeTracker::new();
        tracker.record("color");
        tracker.record("age");
        tracker.record("age");
        assert_eq!(tracker.recorded(), &["color", "age"]);

        let same = row(3, "grey");
        let dirty = tracker.dirty_columns(DirtyTracking::Inline, &FIELDS, &same, Some(&same));
        assert_eq!(dirty, vec!["age", "color"]);

        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[test]
    fn snapshot_reports_only_changed_values() {
        let mut tracker = ChangeTracker::new();
        tracker.record("color");
        let before = row(3, "grey");
        let after = row(4, "grey");
        let dirty = tracker.dirty_columns(DirtyTracking::Snapshot, &FIELDS, &after, Some(&before));
        assert_eq!(dirty, vec!["age"]);

        let all = tracker.dirty_columns(DirtyTracking::Snapshot, &FIELDS, &after, None);
        assert_eq!(all, vec!["age", "color"]);
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("Snapshot".parse::<DirtyTracking>().unwrap(), DirtyTracking::Snapshot);
        assert_eq!(" inline ".parse::<DirtyTracking>().unwrap(), DirtyTracking::Inline);
        assert!(matches!("lazy".parse::<DirtyTracking>(), Err(Error::Config(_))));
        assert_eq!(DirtyTracking::default().to_string(), "inline");
    }
}
