//! Terraform execution capability.
//!
//! The migrators only talk to [`TerraformCli`]. [`Terraform`] implements it
//! on top of an [`Executor`] that runs the binary as a subprocess;
//! [`mock::MockTerraform`] simulates it in memory for tests.

pub mod cli;
pub mod command;
pub mod mock;
pub mod version;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use cli::Terraform;
pub use command::{CommandExecutor, Executor, Output};
pub use version::TerraformVersion;

/// Terraform execution errors.
#[derive(Debug, Error)]
pub enum TfError {
    /// The command exited unsuccessfully.
    #[error("failed to run `{command}` (exit code {code:?}): {stderr}")]
    Exit {
        /// The command line that was run.
        command: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured stdout.
        stdout: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The command could not be started.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        /// The command line that was attempted.
        command: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Temporary file handling failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The version output could not be understood.
    #[error("failed to parse terraform version: {0}")]
    Version(String),

    /// No executable was configured.
    #[error("exec path is empty")]
    EmptyExecPath,

    /// A command finished without producing an expected state.
    #[error("terraform did not produce the {0} state")]
    MissingOutput(&'static str),
}

impl TfError {
    /// Exit code of a failed command.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TfError::Exit { code, .. } => *code,
            _ => None,
        }
    }

    /// Captured stdout of a failed command.
    pub fn stdout(&self) -> &str {
        match self {
            TfError::Exit { stdout, .. } => stdout,
            _ => "",
        }
    }
}

/// An immutable terraform state snapshot.
///
/// Cloning is cheap. Operations never modify a snapshot; they return a new one.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct State {
    bytes: Bytes,
}

impl State {
    /// Wrap serialized state bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The serialized state.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State").field("len", &self.bytes.len()).finish()
    }
}

/// Which state a read-only command should operate on.
#[derive(Debug, Clone)]
pub enum StateSource {
    /// The state configured by the working directory's backend.
    Remote,
    /// A snapshot held in memory.
    Explicit(State),
}

/// A saved plan file.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Plan {
    bytes: Bytes,
}

impl Plan {
    /// Wrap plan file bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// The plan file contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan").field("len", &self.bytes.len()).finish()
    }
}

/// Terraform operations used by the migrators.
///
/// Every call blocks the caller until the underlying command has finished.
#[async_trait]
pub trait TerraformCli: Send + Sync {
    /// Working directory.
    fn dir(&self) -> &Path;

    /// Version of the terraform binary.
    async fn version(&self) -> Result<TerraformVersion, TfError>;

    /// Initialize the working directory.
    async fn init(&self, opts: &[&str]) -> Result<(), TfError>;

    /// Select a workspace.
    async fn workspace_select(&self, workspace: &str) -> Result<(), TfError>;

    /// Compute a plan. With `-detailed-exitcode`, exit code 2 means changes.
    async fn plan(&self, state: &StateSource, opts: &[&str]) -> Result<Plan, TfError>;

    /// Apply a saved plan, or plan and apply when `plan` is `None`.
    async fn apply(&self, plan: Option<&Plan>, opts: &[&str]) -> Result<(), TfError>;

    /// List resource addresses, optionally filtered.
    async fn state_list(
        &self,
        state: &StateSource,
        addresses: &[String],
    ) -> Result<Vec<String>, TfError>;

    /// Download the remote state.
    async fn state_pull(&self) -> Result<State, TfError>;

    /// Upload a state to the remote backend.
    async fn state_push(&self, state: &State) -> Result<(), TfError>;

    /// Move a resource within `state`, or into `state_out` when given.
    async fn state_mv(
        &self,
        state: &State,
        state_out: Option<&State>,
        source: &str,
        destination: &str,
    ) -> Result<(State, Option<State>), TfError>;

    /// Remove resources from a state in one call.
    async fn state_rm(&self, state: &State, addresses: &[String]) -> Result<State, TfError>;

    /// Import an existing object into a state.
    async fn state_import(&self, state: &State, address: &str, id: &str)
        -> Result<State, TfError>;

    /// Replace a provider in a state.
    async fn state_replace_provider(
        &self,
        state: &State,
        source: &str,
        destination: &str,
    ) -> Result<State, TfError>;
}

/// Creates a [`TerraformCli`] for a working directory.
pub trait TerraformProvider: Send + Sync {
    /// Open a terraform handle rooted at `dir`.
    fn open(&self, dir: &Path) -> Arc<dyn TerraformCli>;
}

/// Provider that runs a real binary.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    exec_path: String,
}

impl CommandProvider {
    /// Create a provider for an exec path such as `terraform` or
    /// `direnv exec . terraform`.
    pub fn new(exec_path: impl Into<String>) -> Self {
        Self {
            exec_path: exec_path.into(),
        }
    }
}

impl TerraformProvider for CommandProvider {
    fn open(&self, dir: &Path) -> Arc<dyn TerraformCli> {
        let executor = CommandExecutor::new(self.exec_path.clone(), PathBuf::from(dir));
        Arc::new(Terraform::new(executor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_copy_on_write() {
        let original = State::new(b"abc".to_vec());
        let copy = original.clone();
        let replaced = State::new(b"xyz".to_vec());

        assert_eq!(original, copy);
        assert_ne!(original, replaced);
        assert_eq!(original.bytes(), b"abc");
    }

    #[test]
    fn test_exit_code() {
        let err = TfError::Exit {
            command: "terraform plan".to_string(),
            code: Some(2),
            stdout: "changes".to_string(),
            stderr: String::new(),
        };
        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(err.stdout(), "changes");
        assert_eq!(TfError::EmptyExecPath.exit_code(), None);
    }
}
