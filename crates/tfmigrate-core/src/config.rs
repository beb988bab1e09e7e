//! Tool configuration.
//!
//! ```toml
//! migration_dir = "tfmigrate"
//! exec_path = "terraform"
//!
//! [history.storage]
//! type = "local"
//! path = "tmp/history.json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::storage::StorageConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".tfmigrate.toml";

/// Default terraform command.
pub const DEFAULT_EXEC_PATH: &str = "terraform";

/// Environment variable naming the configuration file.
pub const ENV_CONFIG: &str = "TFMIGRATE_CONFIG";

/// Environment variable overriding `exec_path`.
pub const ENV_EXEC_PATH: &str = "TFMIGRATE_EXEC_PATH";

/// Environment variable holding the log filter.
pub const ENV_LOG: &str = "TFMIGRATE_LOG";

fn default_migration_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_exec_path() -> String {
    DEFAULT_EXEC_PATH.to_string()
}

/// tfmigrate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding migration files.
    #[serde(default = "default_migration_dir")]
    pub migration_dir: PathBuf,

    /// Terraform command, split on whitespace into program and leading
    /// arguments (e.g. `direnv exec . terraform`).
    #[serde(default = "default_exec_path")]
    pub exec_path: String,

    /// Migration history. None disables history tracking.
    #[serde(default)]
    pub history: Option<HistoryConfig>,
}

/// History settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Backend holding the history file.
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            migration_dir: default_migration_dir(),
            exec_path: default_exec_path(),
            history: None,
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn parse(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load the configuration.
    ///
    /// An explicit path must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// read if present and the defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(source) => {
                tracing::debug!(path = %path.display(), "loading config");
                toml::from_str(&source)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Apply overrides from environment variables read through `lookup`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(exec_path) = lookup(ENV_EXEC_PATH).filter(|v| !v.trim().is_empty()) {
            self.exec_path = exec_path;
        }
        self
    }

    /// Override the terraform command.
    pub fn with_exec_path(mut self, exec_path: impl Into<String>) -> Self {
        self.exec_path = exec_path.into();
        self
    }

    /// Override the migration directory.
    pub fn with_migration_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migration_dir = dir.into();
        self
    }

    /// Whether history tracking is configured.
    pub fn history_enabled(&self) -> bool {
        self.history.is_some()
    }
}
