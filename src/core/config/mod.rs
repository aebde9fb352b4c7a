//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! Branchline has two configuration scopes:
//! - **Global**: User-level settings
//! - **State**: Overrides stored next to the branch state
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. State config file (`<state>/config.toml`)
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$BRANCHLINE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/branchline/config.toml`
//! 3. `~/.branchline/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use branchline::core::config::Config;
//! use std::path::Path;
//!
//! let result = Config::load(Some(Path::new(".branchline"))).unwrap();
//! let config = result.config;
//! println!("lock timeout: {:?}", config.lock_timeout());
//! println!("log filter: {}", config.log_filter());
//! ```

pub mod schema;

pub use schema::{FileConfig, LockingConfig, LogConfig, LogFormat, MergeConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Default wait for a branch lock.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;

/// Default number of CAS retries for a commit.
pub const DEFAULT_MAX_COMMIT_RETRIES: u32 = 8;

/// Default `tracing` filter.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// The warning message.
    pub message: String,
    /// The path that triggered the warning.
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Any warnings generated during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// Merged configuration from all sources.
///
/// Accessors apply precedence automatically: the state file overrides
/// the global file, which overrides the defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global configuration
    pub global: FileConfig,
    /// State-directory configuration (if present)
    pub state: Option<FileConfig>,
    global_path: Option<PathBuf>,
    state_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// If `state_dir` is provided, `<state_dir>/config.toml` is layered on
    /// top of the global file.
    ///
    /// # Errors
    ///
    /// Returns an error if config files exist but cannot be parsed or
    /// hold invalid values. Missing files are not an error.
    pub fn load(state_dir: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let global_path = Self::find_global();
        let state_path = state_dir
            .map(|dir| dir.join("config.toml"))
            .filter(|p| p.exists());
        Self::load_from(global_path.as_deref(), state_path.as_deref())
    }

    /// Load configuration from explicit file locations.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_from(
        global_path: Option<&Path>,
        state_path: Option<&Path>,
    ) -> Result<ConfigLoadResult, ConfigError> {
        let mut warnings = Vec::new();

        let global = match global_path {
            Some(path) => Self::read_config(path)?,
            None => FileConfig::default(),
        };
        let state = state_path.map(Self::read_config).transpose()?;

        global.validate()?;
        if let Some(ref s) = state {
            s.validate()?;
            if s.log.is_some() {
                if let Some(path) = state_path {
                    warnings.push(ConfigWarning {
                        message: "[log] in the state config only applies once the state directory is known; early messages use the global setting".into(),
                        path: path.to_path_buf(),
                    });
                }
            }
        }

        Ok(ConfigLoadResult {
            config: Config {
                global,
                state,
                global_path: global_path.map(Path::to_path_buf),
                state_path: state_path.map(Path::to_path_buf),
            },
            warnings,
        })
    }

    /// Locate the global config file, if any.
    fn find_global() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("BRANCHLINE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("branchline/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        dirs::home_dir()
            .map(|home| home.join(".branchline/config.toml"))
            .filter(|p| p.exists())
    }

    fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// Pick the first value set in the state file, then the global file.
    fn layered<T>(&self, get: impl Fn(&FileConfig) -> Option<T>) -> Option<T> {
        self.state.as_ref().and_then(&get).or_else(|| get(&self.global))
    }

    /// How long to wait for a branch lock.
    ///
    /// Defaults to one minute.
    pub fn lock_timeout(&self) -> Duration {
        let ms = self
            .layered(|c| c.locking.as_ref().and_then(|l| l.timeout_ms))
            .unwrap_or(DEFAULT_LOCK_TIMEOUT_MS);
        Duration::from_millis(ms)
    }

    /// How often a commit retries after losing a CAS race.
    pub fn max_commit_retries(&self) -> u32 {
        self.layered(|c| c.merge.as_ref().and_then(|m| m.max_commit_retries))
            .unwrap_or(DEFAULT_MAX_COMMIT_RETRIES)
    }

    /// The `tracing` filter directives.
    pub fn log_filter(&self) -> String {
        self.layered(|c| c.log.as_ref().and_then(|l| l.filter.clone()))
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }

    pub fn log_format(&self) -> LogFormat {
        self.layered(|c| c.log.as_ref().and_then(|l| l.format))
            .unwrap_or_default()
    }

    /// Path the global config was loaded from.
    pub fn global_path(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Path the state config was loaded from.
    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }
}
