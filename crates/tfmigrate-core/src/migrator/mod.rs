//! Migrators.
//!
//! A migrator drives one migration through four phases:
//!
//! 1. **setup** - `init`, optional `workspace select`, `state pull`
//! 2. **apply** - fold the actions over the pulled state, in order
//! 3. **verify** - `plan -detailed-exitcode` against the mutated state; any
//!    change means the migration does not match the configuration
//! 4. **commit** - `state push` (apply mode only)
//!
//! Nothing is pushed unless every earlier phase succeeded.

pub mod file;
pub mod multi_state;
pub mod state;

use std::path::PathBuf;

use thiserror::Error;

use crate::action::ActionError;
use crate::tfexec::{State, StateSource, TerraformCli, TerraformProvider, TfError};

pub use file::{load_migration, MigrationConfig, MigrationFile, MIGRATION_TYPE_MULTI_STATE, MIGRATION_TYPE_STATE};
pub use multi_state::{MultiStateMigrator, MultiStateMigratorConfig};
pub use state::{StateMigrator, StateMigratorConfig};

/// Options passed to the verification plan.
pub const PLAN_OPTS: [&str; 3] = ["-input=false", "-no-color", "-detailed-exitcode"];

/// Exit code of `plan -detailed-exitcode` when changes are present.
const PLAN_HAS_CHANGES: i32 = 2;

/// Migration errors.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The migration file could not be read or decoded.
    #[error("failed to load migration file {path}: {message}")]
    Load {
        /// File path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// The migration is structurally invalid.
    #[error("invalid migration: {0}")]
    Config(String),

    /// An action failed to parse or apply.
    #[error("action #{index} `{action}` failed: {source}")]
    Action {
        /// Zero-based position in the action list.
        index: usize,
        /// The action as declared.
        action: String,
        /// The underlying error.
        #[source]
        source: ActionError,
    },

    /// The migrated state does not match the configuration.
    #[error("terraform plan reports changes in {dir} after migration:\n{output}")]
    Drift {
        /// Working directory that reported changes.
        dir: PathBuf,
        /// Plan output.
        output: String,
    },

    /// Terraform failed outside of an action.
    #[error(transparent)]
    Terraform(#[from] TfError),
}

impl MigrateError {
    /// Whether verification found changes.
    pub fn is_drift(&self) -> bool {
        matches!(self, MigrateError::Drift { .. })
    }
}

/// A migration ready to run.
pub enum Migrator {
    /// Single state.
    State {
        /// Migration name.
        name: String,
        /// The migrator.
        migrator: StateMigrator,
    },
    /// Source and destination states.
    MultiState {
        /// Migration name.
        name: String,
        /// The migrator.
        migrator: MultiStateMigrator,
    },
}

impl Migrator {
    /// Build a migrator, opening working directories through `provider`.
    pub fn from_config(
        config: &MigrationConfig,
        provider: &dyn TerraformProvider,
    ) -> Result<Self, MigrateError> {
        match config {
            MigrationConfig::State(config) => Ok(Migrator::State {
                name: config.name.clone(),
                migrator: StateMigrator::new(config, provider)?,
            }),
            MigrationConfig::MultiState(config) => Ok(Migrator::MultiState {
                name: config.name.clone(),
                migrator: MultiStateMigrator::new(config, provider)?,
            }),
        }
    }

    /// Migration type as recorded in history.
    pub fn migration_type(&self) -> &'static str {
        match self {
            Migrator::State { .. } => MIGRATION_TYPE_STATE,
            Migrator::MultiState { .. } => MIGRATION_TYPE_MULTI_STATE,
        }
    }

    /// Migration name.
    pub fn name(&self) -> &str {
        match self {
            Migrator::State { name, .. } | Migrator::MultiState { name, .. } => name,
        }
    }

    /// Dry run: compute and verify, never push.
    pub async fn plan(&self) -> Result<(), MigrateError> {
        match self {
            Migrator::State { migrator, .. } => migrator.plan().await,
            Migrator::MultiState { migrator, .. } => migrator.plan().await,
        }
    }

    /// Compute, verify and push.
    pub async fn apply(&self) -> Result<(), MigrateError> {
        match self {
            Migrator::State { migrator, .. } => migrator.apply().await,
            Migrator::MultiState { migrator, .. } => migrator.apply().await,
        }
    }
}

/// Verify that `state` yields an empty plan in `tf`'s directory.
pub(crate) async fn check_plan(
    tf: &dyn TerraformCli,
    state: &State,
    force: bool,
) -> Result<(), MigrateError> {
    tracing::info!(dir = %tf.dir().display(), "verifying migrated state");

    match tf.plan(&StateSource::Explicit(state.clone()), &PLAN_OPTS).await {
        Ok(_) => Ok(()),
        Err(err) if err.exit_code() == Some(PLAN_HAS_CHANGES) => {
            if force {
                tracing::warn!(
                    dir = %tf.dir().display(),
                    "plan has changes, continuing because force is set"
                );
                Ok(())
            } else {
                Err(MigrateError::Drift {
                    dir: tf.dir().to_path_buf(),
                    output: err.stdout().to_string(),
                })
            }
        }
        Err(err) => Err(err.into()),
    }
}
