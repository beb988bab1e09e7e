//! Migration file format.
//!
//! A migration file holds one `[migration]` table tagged by `type`:
//!
//! ```toml
//! [migration]
//! type = "multi_state"
//! name = "mv_dir1_dir2"
//! from_dir = "dir1"
//! to_dir = "dir2"
//! actions = [
//!   "mv aws_security_group.foo aws_security_group.foo2",
//!   "xmv null_resource.* null_resource.$1",
//! ]
//! ```
//!
//! JSON files use the same structure.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{MigrateError, MultiStateMigratorConfig, StateMigratorConfig};

/// History type of single-state migrations.
pub const MIGRATION_TYPE_STATE: &str = "state";
/// History type of multi-state migrations.
pub const MIGRATION_TYPE_MULTI_STATE: &str = "multi_state";

/// Top-level document of a migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFile {
    /// The migration.
    pub migration: MigrationConfig,
}

/// A migration, by type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationConfig {
    /// `type = "state"`
    State(StateMigratorConfig),
    /// `type = "multi_state"`
    MultiState(MultiStateMigratorConfig),
}

impl MigrationConfig {
    /// Migration type as recorded in history.
    pub fn migration_type(&self) -> &'static str {
        match self {
            MigrationConfig::State(_) => MIGRATION_TYPE_STATE,
            MigrationConfig::MultiState(_) => MIGRATION_TYPE_MULTI_STATE,
        }
    }

    /// Migration name.
    pub fn name(&self) -> &str {
        match self {
            MigrationConfig::State(c) => &c.name,
            MigrationConfig::MultiState(c) => &c.name,
        }
    }

    fn actions(&self) -> &[String] {
        match self {
            MigrationConfig::State(c) => &c.actions,
            MigrationConfig::MultiState(c) => &c.actions,
        }
    }

    /// Decode a migration from `source`, choosing the format by the
    /// extension of `path`.
    pub fn parse(path: &Path, source: &str) -> Result<Self, MigrateError> {
        let load_err = |message: String| MigrateError::Load {
            path: path.to_path_buf(),
            message,
        };

        let file: MigrationFile = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(source).map_err(|e| load_err(e.to_string()))?,
            Some("json") => serde_json::from_str(source).map_err(|e| load_err(e.to_string()))?,
            other => {
                return Err(load_err(format!(
                    "unsupported extension {:?}, expected toml or json",
                    other.unwrap_or("")
                )))
            }
        };

        let config = file.migration;
        if config.name().is_empty() {
            return Err(MigrateError::Config(format!(
                "{}: migration name is empty",
                path.display()
            )));
        }
        if config.actions().is_empty() {
            return Err(MigrateError::Config(format!(
                "{}: migration {} has no actions",
                path.display(),
                config.name()
            )));
        }
        Ok(config)
    }
}

/// Read and decode a migration file.
pub async fn load_migration(path: &Path) -> Result<MigrationConfig, MigrateError> {
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| MigrateError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    tracing::debug!(path = %path.display(), "loaded migration file");
    MigrationConfig::parse(path, &source)
}
