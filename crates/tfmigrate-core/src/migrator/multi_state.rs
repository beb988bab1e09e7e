//! Migrator that moves resources between two states.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{check_plan, MigrateError};
use crate::action::MultiStateAction;
use crate::tfexec::{State, TerraformCli, TerraformProvider};

/// `multi_state` migration as declared in a migration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiStateMigratorConfig {
    /// Migration name.
    pub name: String,
    /// Working directory of the source state.
    pub from_dir: PathBuf,
    /// Working directory of the destination state.
    pub to_dir: PathBuf,
    /// Workspace of the source state.
    #[serde(default)]
    pub from_workspace: Option<String>,
    /// Workspace of the destination state.
    #[serde(default)]
    pub to_workspace: Option<String>,
    /// Ordered action strings.
    pub actions: Vec<String>,
    /// Accept plans with changes instead of failing.
    #[serde(default)]
    pub force: bool,
    /// Do not verify the source state with a plan.
    #[serde(default)]
    pub from_skip_plan: bool,
    /// Do not verify the destination state with a plan.
    #[serde(default)]
    pub to_skip_plan: bool,
}

/// Applies actions across two states and verifies both.
pub struct MultiStateMigrator {
    from_tf: Arc<dyn TerraformCli>,
    to_tf: Arc<dyn TerraformCli>,
    from_workspace: Option<String>,
    to_workspace: Option<String>,
    actions: Vec<MultiStateAction>,
    force: bool,
    from_skip_plan: bool,
    to_skip_plan: bool,
}

impl MultiStateMigrator {
    /// Parse the configured actions and open both working directories.
    pub fn new(
        config: &MultiStateMigratorConfig,
        provider: &dyn TerraformProvider,
    ) -> Result<Self, MigrateError> {
        if config.actions.is_empty() {
            return Err(MigrateError::Config(format!(
                "migration {} has no actions",
                config.name
            )));
        }

        let mut actions = Vec::with_capacity(config.actions.len());
        for (index, action) in config.actions.iter().enumerate() {
            let parsed = action.parse().map_err(|source| MigrateError::Action {
                index,
                action: action.clone(),
                source,
            })?;
            actions.push(parsed);
        }

        Ok(Self {
            from_tf: provider.open(&config.from_dir),
            to_tf: provider.open(&config.to_dir),
            from_workspace: config.from_workspace.clone(),
            to_workspace: config.to_workspace.clone(),
            actions,
            force: config.force,
            from_skip_plan: config.from_skip_plan,
            to_skip_plan: config.to_skip_plan,
        })
    }

    /// Compute the migrated states and verify them, without pushing.
    pub async fn plan(&self) -> Result<(), MigrateError> {
        tracing::info!(
            from = %self.from_tf.dir().display(),
            to = %self.to_tf.dir().display(),
            "planning multi state migration"
        );
        self.migrate().await.map(|_| ())
    }

    /// Compute, verify and push both states.
    ///
    /// The destination is pushed before the source, so a crash between the
    /// two pushes leaves a resource tracked twice rather than not at all.
    pub async fn apply(&self) -> Result<(), MigrateError> {
        tracing::info!(
            from = %self.from_tf.dir().display(),
            to = %self.to_tf.dir().display(),
            "applying multi state migration"
        );
        let (from_state, to_state) = self.migrate().await?;

        tracing::info!(dir = %self.to_tf.dir().display(), "pushing destination state");
        self.to_tf.state_push(&to_state).await?;
        tracing::info!(dir = %self.from_tf.dir().display(), "pushing source state");
        self.from_tf.state_push(&from_state).await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(State, State), MigrateError> {
        let from_tf = self.from_tf.as_ref();
        let to_tf = self.to_tf.as_ref();

        let mut from_state = setup(from_tf, self.from_workspace.as_deref()).await?;
        let mut to_state = setup(to_tf, self.to_workspace.as_deref()).await?;

        for (index, action) in self.actions.iter().enumerate() {
            tracing::info!(action = %action, "applying multi state action");
            (from_state, to_state) = action
                .apply(from_tf, &from_state, &to_state)
                .await
                .map_err(|source| MigrateError::Action {
                    index,
                    action: action.to_string(),
                    source,
                })?;
        }

        if self.from_skip_plan {
            tracing::info!(dir = %from_tf.dir().display(), "skipping plan");
        } else {
            check_plan(from_tf, &from_state, self.force).await?;
        }

        if self.to_skip_plan {
            tracing::info!(dir = %to_tf.dir().display(), "skipping plan");
        } else {
            check_plan(to_tf, &to_state, self.force).await?;
        }

        Ok((from_state, to_state))
    }
}

async fn setup(tf: &dyn TerraformCli, workspace: Option<&str>) -> Result<State, MigrateError> {
    tf.init(&["-input=false", "-no-color"]).await?;
    if let Some(workspace) = workspace {
        tf.workspace_select(workspace).await?;
    }
    Ok(tf.state_pull().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tfexec::mock::{MockProvider, MockTerraform};

    fn config(actions: &[&str]) -> MultiStateMigratorConfig {
        MultiStateMigratorConfig {
            name: "test".to_string(),
            from_dir: PathBuf::from("dir1"),
            to_dir: PathBuf::from("dir2"),
            from_workspace: None,
            to_workspace: None,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            force: false,
            from_skip_plan: false,
            to_skip_plan: false,
        }
    }

    fn setup_provider(
        from_expected: &[&str],
        to_expected: &[&str],
    ) -> (MockProvider, Arc<MockTerraform>, Arc<MockTerraform>) {
        let provider = MockProvider::new();
        let from = provider.register(
            MockTerraform::new("dir1")
                .with_remote(&["null_resource.foo", "null_resource.bar"])
                .with_expected(from_expected),
        );
        let to = provider.register(
            MockTerraform::new("dir2")
                .with_remote(&["null_resource.baz"])
                .with_expected(to_expected),
        );
        (provider, from, to)
    }

    #[tokio::test]
    async fn test_apply_pushes_destination_first() {
        let (provider, from, to) = setup_provider(
            &["null_resource.bar"],
            &["null_resource.baz", "null_resource.foo2"],
        );

        let migrator =
            MultiStateMigrator::new(&config(&["mv null_resource.foo null_resource.foo2"]), &provider)
                .unwrap();
        migrator.apply().await.unwrap();

        assert_eq!(from.remote_addresses(), vec!["null_resource.bar"]);
        assert_eq!(to.remote_addresses(), vec!["null_resource.baz", "null_resource.foo2"]);

        let pushes: Vec<String> = provider
            .calls()
            .into_iter()
            .filter(|c| c.ends_with("state push"))
            .collect();
        assert_eq!(pushes, vec!["dir2: state push", "dir1: state push"]);
    }

    #[tokio::test]
    async fn test_wildcard_merge_all() {
        let (provider, from, to) = setup_provider(
            &[],
            &["null_resource.baz", "null_resource.foo", "null_resource.bar"],
        );

        MultiStateMigrator::new(&config(&["xmv * $1"]), &provider)
            .unwrap()
            .apply()
            .await
            .unwrap();

        assert!(from.remote_addresses().is_empty());
        assert_eq!(to.remote_addresses().len(), 3);
    }

    #[tokio::test]
    async fn test_drift_in_destination_blocks_both_pushes() {
        let (provider, _from, _to) = setup_provider(&["null_resource.bar"], &["null_resource.baz"]);

        let err = MultiStateMigrator::new(&config(&["mv null_resource.foo null_resource.foo"]), &provider)
            .unwrap()
            .apply()
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::Drift { ref dir, .. } if dir == &PathBuf::from("dir2")));
        assert!(!provider.calls().iter().any(|c| c.ends_with("state push")));
    }

    #[tokio::test]
    async fn test_skip_plans() {
        let (provider, _from, _to) = setup_provider(&["nothing"], &["nothing"]);

        let mut config = config(&["mv null_resource.foo null_resource.foo"]);
        config.from_skip_plan = true;
        config.to_skip_plan = true;
        MultiStateMigrator::new(&config, &provider)
            .unwrap()
            .plan()
            .await
            .unwrap();

        assert!(!provider.calls().iter().any(|c| c.contains("plan")));
    }

    #[test]
    fn test_rejects_single_state_actions() {
        let provider = MockProvider::new();
        assert!(matches!(
            MultiStateMigrator::new(&config(&["rm null_resource.foo"]), &provider),
            Err(MigrateError::Action { index: 0, .. })
        ));
    }
}
