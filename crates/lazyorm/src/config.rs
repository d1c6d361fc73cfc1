//! Factory-wide configuration.

use lazyorm_core::error::{ConfigError, Error};
use lazyorm_core::Result;
use lazyorm_session::{DirtyTracking, SessionConfig};
use serde::Serialize;
use std::env;

/// Environment variable names read by [`OrmConfig::from_env`].
pub const ENV_GENERATE_STATISTICS: &str = "LAZYORM_GENERATE_STATISTICS";
pub const ENV_LOG_STATEMENTS: &str = "LAZYORM_LOG_STATEMENTS";
pub const ENV_DIRTY_TRACKING: &str = "LAZYORM_DIRTY_TRACKING";
pub const ENV_ENFORCE_FOREIGN_KEYS: &str = "LAZYORM_ENFORCE_FOREIGN_KEYS";

/// Configuration shared by every session a factory opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrmConfig {
    /// Count loads, writes and sessions.
    pub generate_statistics: bool,
    /// Log every store statement at info level under `lazyorm::sql`.
    pub log_statements: bool,
    /// How dirty columns are detected.
    #[serde(serialize_with = "serialize_tracking")]
    pub dirty_tracking: DirtyTracking,
    /// Reject writes that break foreign keys (default store only).
    pub enforce_foreign_keys: bool,
}

fn serialize_tracking<S: serde::Serializer>(
    mode: &DirtyTracking,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(mode.as_str())
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            generate_statistics: true,
            log_statements: false,
            dirty_tracking: DirtyTracking::Inline,
            enforce_foreign_keys: true,
        }
    }
}

impl OrmConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from the `LAZYORM_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable ones are an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_GENERATE_STATISTICS) {
            config.generate_statistics = parse_flag(ENV_GENERATE_STATISTICS, &v)?;
        }
        if let Some(v) = lookup(ENV_LOG_STATEMENTS) {
            config.log_statements = parse_flag(ENV_LOG_STATEMENTS, &v)?;
        }
        if let Some(v) = lookup(ENV_DIRTY_TRACKING) {
            config.dirty_tracking = v.parse()?;
        }
        if let Some(v) = lookup(ENV_ENFORCE_FOREIGN_KEYS) {
            config.enforce_foreign_keys = parse_flag(ENV_ENFORCE_FOREIGN_KEYS, &v)?;
        }
        tracing::debug!(?config, "configuration loaded from environment");
        Ok(config)
    }

    /// Enable/disable statistics.
    pub fn with_statistics(mut self, enabled: bool) -> Self {
        self.generate_statistics = enabled;
        self
    }

    /// Enable/disable statement logging.
    pub fn with_log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    /// Set the dirty tracking mode.
    pub fn with_dirty_tracking(mut self, mode: DirtyTracking) -> Self {
        self.dirty_tracking = mode;
        self
    }

    /// Enable/disable foreign key enforcement in the default store.
    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.enforce_foreign_keys = enabled;
        self
    }

    /// Per-session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            dirty_tracking: self.dirty_tracking,
            log_statements: self.log_statements,
        }
    }
}

/// Parse a boolean flag.
///
/// Recognizes `1`, `true`, `yes`, `on` and `0`, `false`, `no`, `off`
/// (case-insensitive).
fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(ConfigError {
            message: format!("{} must be a boolean, got '{}'", name, other),
            source: None,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = OrmConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OrmConfig::default());
        assert!(config.generate_statistics);
        assert!(config.enforce_foreign_keys);
    }

    #[test]
    fn variables_override_defaults() {
        let config = OrmConfig::from_lookup(lookup(&[
            (ENV_LOG_STATEMENTS, "YES"),
            (ENV_DIRTY_TRACKING, "snapshot"),
            (ENV_ENFORCE_FOREIGN_KEYS, "off"),
            (ENV_GENERATE_STATISTICS, "0"),
        ]))
        .unwrap();
        assert!(config.log_statements);
        assert!(!config.enforce_foreign_keys);
        assert!(!config.generate_statistics);
        assert_eq!(config.session_config().dirty_tracking, DirtyTracking::Snapshot);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = OrmConfig::from_lookup(lookup(&[(ENV_LOG_STATEMENTS, "maybe")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains(ENV_LOG_STATEMENTS));

        let err = OrmConfig::from_lookup(lookup(&[(ENV_DIRTY_TRACKING, "eager")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn builders_and_serialization() {
        let config = OrmConfig::new()
            .with_statistics(false)
            .with_log_statements(true)
            .with_dirty_tracking(DirtyTracking::Snapshot)
            .with_foreign_keys(false);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["dirty_tracking"], "snapshot");
        assert_eq!(json["log_statements"], true);
        assert_eq!(json["enforce_foreign_keys"], false);
    }
}
