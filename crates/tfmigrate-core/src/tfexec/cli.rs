//! [`TerraformCli`] implemented by running the terraform binary.
//!
//! In-memory states are written to files inside a temporary directory that
//! lives for exactly one call; results are read back before the directory is
//! dropped. Commands that only accept `-state` with a local backend (`plan`,
//! `import`) temporarily override the backend with an override file and
//! re-initialize afterwards.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;

use super::command::Executor;
use super::{Plan, State, StateSource, TerraformCli, TerraformVersion, TfError};

/// Name of the backend override file written into the working directory.
pub const BACKEND_OVERRIDE_FILE: &str = "_tfmigrate_override.tf";

const LOCAL_BACKEND: &str = "terraform {\n  backend \"local\" {\n  }\n}\n";
const STATE_FILE: &str = "terraform.tfstate";
const STATE_OUT_FILE: &str = "terraform.out.tfstate";
const PLAN_FILE: &str = "tfplan";
const REINIT_OPTS: &[&str] = &["-input=false", "-no-color", "-reconfigure"];

/// Terraform driven through an [`Executor`].
#[derive(Debug, Clone)]
pub struct Terraform<E> {
    executor: E,
}

impl<E: Executor> Terraform<E> {
    /// Wrap an executor.
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    /// The underlying executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    async fn run(&self, args: Vec<String>) -> Result<String, TfError> {
        Ok(self.executor.run_checked(&args).await?.stdout)
    }

    async fn override_backend(&self) -> Result<BackendOverride, TfError> {
        let path = self.executor.dir().join(BACKEND_OVERRIDE_FILE);
        tokio::fs::write(&path, LOCAL_BACKEND).await?;
        let guard = BackendOverride { path };

        tracing::debug!(dir = %self.executor.dir().display(), "switched to local backend");
        self.init(REINIT_OPTS).await?;
        Ok(guard)
    }

    async fn restore_backend(&self, guard: BackendOverride) -> Result<(), TfError> {
        drop(guard);
        tracing::debug!(dir = %self.executor.dir().display(), "switching back to remote backend");
        self.init(REINIT_OPTS).await
    }
}

/// Removes the backend override file when dropped.
#[derive(Debug)]
struct BackendOverride {
    path: PathBuf,
}

impl Drop for BackendOverride {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove backend override");
        }
    }
}

fn words(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn flag(name: &str, path: &Path) -> String {
    format!("-{}={}", name, path.display())
}

async fn write_state(dir: &TempDir, name: &str, state: &State) -> Result<PathBuf, TfError> {
    let path = dir.path().join(name);
    tokio::fs::write(&path, state.bytes()).await?;
    Ok(path)
}

async fn read_state(path: &Path) -> Result<State, TfError> {
    Ok(State::new(tokio::fs::read(path).await?))
}

fn scratch_dir() -> Result<TempDir, TfError> {
    Ok(tempfile::Builder::new().prefix("tfmigrate").tempdir()?)
}

#[async_trait]
impl<E: Executor> TerraformCli for Terraform<E> {
    fn dir(&self) -> &Path {
        self.executor.dir()
    }

    async fn version(&self) -> Result<TerraformVersion, TfError> {
        let stdout = self.run(words(&["version"])).await?;
        TerraformVersion::from_output(&stdout)
    }

    async fn init(&self, opts: &[&str]) -> Result<(), TfError> {
        let mut args = words(&["init"]);
        args.extend(words(opts));
        self.run(args).await.map(|_| ())
    }

    async fn workspace_select(&self, workspace: &str) -> Result<(), TfError> {
        self.run(words(&["workspace", "select", workspace]))
            .await
            .map(|_| ())
    }

    async fn plan(&self, state: &StateSource, opts: &[&str]) -> Result<Plan, TfError> {
        let tmp = scratch_dir()?;
        let plan_path = tmp.path().join(PLAN_FILE);

        let mut args = words(&["plan"]);
        args.extend(words(opts));
        args.push(flag("out", &plan_path));

        match state {
            StateSource::Remote => {
                self.run(args).await?;
            }
            StateSource::Explicit(state) => {
                let state_path = write_state(&tmp, STATE_FILE, state).await?;
                args.push(flag("state", &state_path));

                let guard = self.override_backend().await?;
                let result = self.run(args).await;
                let restored = self.restore_backend(guard).await;
                result?;
                restored?;
            }
        }

        Ok(Plan::new(tokio::fs::read(&plan_path).await?))
    }

    async fn apply(&self, plan: Option<&Plan>, opts: &[&str]) -> Result<(), TfError> {
        let tmp = scratch_dir()?;
        let mut args = words(&["apply"]);
        args.extend(words(opts));

        if let Some(plan) = plan {
            let plan_path = tmp.path().join(PLAN_FILE);
            tokio::fs::write(&plan_path, plan.bytes()).await?;
            args.push(plan_path.display().to_string());
        }

        self.run(args).await.map(|_| ())
    }

    async fn state_list(
        &self,
        state: &StateSource,
        addresses: &[String],
    ) -> Result<Vec<String>, TfError> {
        let tmp = scratch_dir()?;
        let mut args = words(&["state", "list"]);
        if let StateSource::Explicit(state) = state {
            let state_path = write_state(&tmp, STATE_FILE, state).await?;
            args.push(flag("state", &state_path));
        }
        args.extend(addresses.iter().cloned());

        let stdout = self.run(args).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn state_pull(&self) -> Result<State, TfError> {
        let stdout = self.run(words(&["state", "pull"])).await?;
        Ok(State::new(stdout.into_bytes()))
    }

    async fn state_push(&self, state: &State) -> Result<(), TfError> {
        let tmp = scratch_dir()?;
        let state_path = write_state(&tmp, STATE_FILE, state).await?;

        let mut args = words(&["state", "push"]);
        args.push(state_path.display().to_string());
        self.run(args).await.map(|_| ())
    }

    async fn state_mv(
        &self,
        state: &State,
        state_out: Option<&State>,
        source: &str,
        destination: &str,
    ) -> Result<(State, Option<State>), TfError> {
        let tmp = scratch_dir()?;
        let state_path = write_state(&tmp, STATE_FILE, state).await?;

        let mut args = words(&["state", "mv"]);
        args.push(flag("state", &state_path));

        let state_out_path = match state_out {
            Some(out) => {
                let path = write_state(&tmp, STATE_OUT_FILE, out).await?;
                args.push(flag("state-out", &path));
                Some(path)
            }
            None => None,
        };
        args.push(source.to_string());
        args.push(destination.to_string());

        self.run(args).await?;

        let updated = read_state(&state_path).await?;
        let updated_out = match state_out_path {
            Some(path) => Some(read_state(&path).await?),
            None => None,
        };
        Ok((updated, updated_out))
    }

    async fn state_rm(&self, state: &State, addresses: &[String]) -> Result<State, TfError> {
        let tmp = scratch_dir()?;
        let state_path = write_state(&tmp, STATE_FILE, state).await?;

        let mut args = words(&["state", "rm"]);
        args.push(flag("state", &state_path));
        args.extend(addresses.iter().cloned());

        self.run(args).await?;
        read_state(&state_path).await
    }

    async fn state_import(
        &self,
        state: &State,
        address: &str,
        id: &str,
    ) -> Result<State, TfError> {
        let tmp = scratch_dir()?;
        let state_path = write_state(&tmp, STATE_FILE, state).await?;

        let mut args = words(&["import", "-input=false", "-no-color"]);
        args.push(flag("state", &state_path));
        args.push(address.to_string());
        args.push(id.to_string());

        let guard = self.override_backend().await?;
        let result = self.run(args).await;
        let restored = self.restore_backend(guard).await;
        result?;
        restored?;

        read_state(&state_path).await
    }

    async fn state_replace_provider(
        &self,
        state: &State,
        source: &str,
        destination: &str,
    ) -> Result<State, TfError> {
        let tmp = scratch_dir()?;
        let state_path = write_state(&tmp, STATE_FILE, state).await?;

        let mut args = words(&["state", "replace-provider", "-auto-approve"]);
        args.push(flag("state", &state_path));
        args.push(source.to_string());
        args.push(destination.to_string());

        self.run(args).await?;
        read_state(&state_path).await
    }
}
