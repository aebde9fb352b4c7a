//! core::config::schema
//!
//! Configuration schema types.
//!
//! Both the global file and the state-directory file share one schema;
//! every key is optional so a file only needs the values it overrides.
//!
//! # Validation
//!
//! Config values are validated after parsing (e.g. the lock timeout must
//! be positive and the log filter must be a valid directive list).

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// One configuration file.
///
/// # Example
///
/// ```toml
/// [locking]
/// timeout_ms = 60000
///
/// [merge]
/// max_commit_retries = 8
///
/// [log]
/// filter = "branchline=debug"
/// format = "json"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Per-path lock settings
    pub locking: Option<LockingConfig>,

    /// Merge and commit settings
    pub merge: Option<MergeConfig>,

    /// Logging settings
    pub log: Option<LogConfig>,
}

impl FileConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(locking) = &self.locking {
            if locking.timeout_ms == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "locking.timeout_ms must be greater than 0".into(),
                ));
            }
        }

        if let Some(merge) = &self.merge {
            if merge.max_commit_retries == Some(0) {
                return Err(ConfigError::InvalidValue(
                    "merge.max_commit_retries must be at least 1".into(),
                ));
            }
        }

        if let Some(filter) = self.log.as_ref().and_then(|l| l.filter.as_deref()) {
            tracing_subscriber::EnvFilter::try_new(filter).map_err(|e| {
                ConfigError::InvalidValue(format!("invalid log.filter '{filter}': {e}"))
            })?;
        }

        Ok(())
    }
}

/// Per-path lock settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LockingConfig {
    /// How long to wait for a branch lock before giving up
    pub timeout_ms: Option<u64>,
}

/// Merge and commit settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// How often a commit re-reads and retries after losing a CAS race
    pub max_commit_retries: Option<u32>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `tracing` filter directives
    pub filter: Option<String>,

    /// Output format
    pub format: Option<LogFormat>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        let config: FileConfig = toml::from_str("").unwrap();
        assert_eq!(config, FileConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_file_parses() {
        let config: FileConfig = toml::from_str(
            r#"
            [locking]
            timeout_ms = 250

            [merge]
            max_commit_retries = 3

            [log]
            filter = "branchline=debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.locking.unwrap().timeout_ms, Some(250));
        assert_eq!(config.merge.unwrap().max_commit_retries, Some(3));
        assert_eq!(config.log.unwrap().format, Some(LogFormat::Json));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<FileConfig>("trunk = \"main\"").is_err());
        assert!(toml::from_str::<FileConfig>("[locking]\nretries = 1").is_err());
    }

    #[test]
    fn zero_timeout_invalid() {
        let config: FileConfig = toml::from_str("[locking]\ntimeout_ms = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_retries_invalid() {
        let config: FileConfig = toml::from_str("[merge]\nmax_commit_retries = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_filter_invalid() {
        let config: FileConfig = toml::from_str("[log]\nfilter = \"=[\"").unwrap();
        assert!(config.validate().is_err());
    }
}
