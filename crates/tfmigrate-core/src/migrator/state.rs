//! Single-state migrator.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{check_plan, MigrateError};
use crate::action::StateAction;
use crate::tfexec::{State, TerraformCli, TerraformProvider};

/// `state` migration as declared in a migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMigratorConfig {
    /// Migration name.
    pub name: String,
    /// Terraform working directory.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Workspace to select before pulling state.
    #[serde(default)]
    pub workspace: Option<String>,
    /// Ordered action strings.
    pub actions: Vec<String>,
    /// Accept a plan with changes instead of failing.
    #[serde(default)]
    pub force: bool,
    /// Do not verify the migrated state with a plan.
    #[serde(default)]
    pub skip_plan: bool,
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Applies actions to one state and verifies the result.
pub struct StateMigrator {
    tf: Arc<dyn TerraformCli>,
    workspace: Option<String>,
    actions: Vec<StateAction>,
    force: bool,
    skip_plan: bool,
}

impl StateMigrator {
    /// Parse the configured actions and open the working directory.
    pub fn new(
        config: &StateMigratorConfig,
        provider: &dyn TerraformProvider,
    ) -> Result<Self, MigrateError> {
        if config.actions.is_empty() {
            return Err(MigrateError::Config(format!(
                "migration {} has no actions",
                config.name
            )));
        }

        let actions = config
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| {
                action.parse().map_err(|source| MigrateError::Action {
                    index,
                    action: action.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            tf: provider.open(&config.dir),
            workspace: config.workspace.clone(),
            actions,
            force: config.force,
            skip_plan: config.skip_plan,
        })
    }

    /// The parsed actions, in declaration order.
    pub fn actions(&self) -> &[StateAction] {
        &self.actions
    }

    /// Compute the migrated state and verify it, without pushing.
    pub async fn plan(&self) -> Result<(), MigrateError> {
        tracing::info!(dir = %self.tf.dir().display(), "planning state migration");
        self.migrate().await.map(|_| ())
    }

    /// Compute, verify and push the migrated state.
    pub async fn apply(&self) -> Result<(), MigrateError> {
        tracing::info!(dir = %self.tf.dir().display(), "applying state migration");
        let state = self.migrate().await?;

        tracing::info!(dir = %self.tf.dir().display(), "pushing migrated state");
        self.tf.state_push(&state).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<State, MigrateError> {
        let tf = self.tf.as_ref();

        tf.init(&["-input=false", "-no-color"]).await?;
        if let Some(workspace) = &self.workspace {
            tf.workspace_select(workspace).await?;
        }

        let mut state = tf.state_pull().await?;
        for (index, action) in self.actions.iter().enumerate() {
            tracing::info!(dir = %tf.dir().display(), action = %action, "applying action");
            state = action
                .apply(tf, &state)
                .await
                .map_err(|source| MigrateError::Action {
                    index,
                    action: action.to_string(),
                    source,
                })?;
        }

        if self.skip_plan {
            tracing::info!(dir = %tf.dir().display(), "skipping plan");
        } else {
            check_plan(tf, &state, self.force).await?;
        }

        Ok(state)
    }
}
