//! Subprocess execution.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use super::TfError;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Exit code, `None` if killed by a signal.
    pub code: Option<i32>,
}

impl Output {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a terraform command line and captures its output.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Working directory commands run in.
    fn dir(&self) -> &Path;

    /// Run the binary with `args`. A non-zero exit is not an error here.
    async fn run(&self, args: &[String]) -> Result<Output, TfError>;

    /// Run the binary and turn a non-zero exit into [`TfError::Exit`].
    async fn run_checked(&self, args: &[String]) -> Result<Output, TfError> {
        let output = self.run(args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(TfError::Exit {
                command: args.join(" "),
                code: output.code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
    }
}

/// Executor that spawns the configured binary.
///
/// The exec path may contain several words (`direnv exec . terraform`); the
/// first is the program and the rest are prepended to every command.
/// Children are killed when the running future is dropped, so cancelling a
/// migration terminates the subprocess.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    exec_path: String,
    dir: PathBuf,
    env: Vec<(String, String)>,
}

impl CommandExecutor {
    /// Create an executor running `exec_path` in `dir`.
    pub fn new(exec_path: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            exec_path: exec_path.into(),
            dir: dir.into(),
            env: vec![("TF_IN_AUTOMATION".to_string(), "1".to_string())],
        }
    }

    /// Add an environment variable for every command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The configured exec path.
    pub fn exec_path(&self) -> &str {
        &self.exec_path
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    fn dir(&self) -> &Path {
        &self.dir
    }

    async fn run(&self, args: &[String]) -> Result<Output, TfError> {
        let mut words = self.exec_path.split_whitespace();
        let program = words.next().ok_or(TfError::EmptyExecPath)?;
        let command_line = format!("{} {}", self.exec_path, args.join(" "));

        tracing::debug!(dir = %self.dir.display(), command = %command_line, "running command");

        let output = tokio::process::Command::new(program)
            .args(words)
            .args(args)
            .current_dir(&self.dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TfError::Spawn {
                command: command_line.clone(),
                source,
            })?;

        let output = Output {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        };

        tracing::trace!(command = %command_line, code = ?output.code, "command finished");
        Ok(output)
    }
}
