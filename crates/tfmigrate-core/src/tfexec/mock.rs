//! In-memory terraform simulator.
//!
//! States are JSON arrays of resource addresses. Moves, removals and imports
//! edit that list, and `plan` reports changes when the planned state differs
//! from the expected set of addresses. Every call is appended to a call log
//! that several simulators can share, so tests can assert on cross-directory
//! ordering.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Plan, State, StateSource, TerraformCli, TerraformProvider, TerraformVersion, TfError};

/// Shared log of simulated commands, formatted as `<dir>: <command>`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
struct Inner {
    remote: State,
    version: TerraformVersion,
    expected: Option<Vec<String>>,
    fail_on: Option<String>,
    hang_on: Option<String>,
}

/// Simulated terraform working directory.
#[derive(Debug)]
pub struct MockTerraform {
    dir: PathBuf,
    inner: Mutex<Inner>,
    log: CallLog,
}

impl MockTerraform {
    /// Create a simulator with an empty remote state.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inner: Mutex::new(Inner {
                remote: state_of::<&str>(&[]),
                version: TerraformVersion::new(1, 5, 7),
                expected: None,
                fail_on: None,
                hang_on: None,
            }),
            log: CallLog::default(),
        }
    }

    /// Seed the remote state.
    pub fn with_remote(self, addresses: &[&str]) -> Self {
        self.inner.lock().remote = state_of(addresses);
        self
    }

    /// Addresses a plan must find for it to report no changes.
    pub fn with_expected(self, addresses: &[&str]) -> Self {
        self.inner.lock().expected = Some(addresses.iter().map(|a| a.to_string()).collect());
        self
    }

    /// Report a different terraform version.
    pub fn with_version(self, version: TerraformVersion) -> Self {
        self.inner.lock().version = version;
        self
    }

    /// Make commands starting with `command` (e.g. `state mv`) fail.
    pub fn failing(self, command: impl Into<String>) -> Self {
        self.inner.lock().fail_on = Some(command.into());
        self
    }

    /// Make commands starting with `command` never complete.
    pub fn hanging(self, command: impl Into<String>) -> Self {
        self.inner.lock().hang_on = Some(command.into());
        self
    }

    /// Share a call log with other simulators.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// The call log.
    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    /// Commands recorded so far, without the directory prefix.
    pub fn calls(&self) -> Vec<String> {
        let prefix = format!("{}: ", self.dir.display());
        self.log
            .lock()
            .iter()
            .filter_map(|c| c.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect()
    }

    /// Addresses in the remote state.
    pub fn remote_addresses(&self) -> Vec<String> {
        addresses(&self.inner.lock().remote)
    }

    async fn enter(&self, command: String) -> Result<(), TfError> {
        self.log
            .lock()
            .push(format!("{}: {}", self.dir.display(), command));

        let hangs = {
            let inner = self.inner.lock();
            if let Some(fail) = &inner.fail_on {
                if command.starts_with(fail.as_str()) {
                    return Err(exit(&command, 1, "", "simulated failure"));
                }
            }
            inner
                .hang_on
                .as_deref()
                .is_some_and(|hang| command.starts_with(hang))
        };

        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Encode a list of addresses as a simulated state.
pub fn state_of<S: AsRef<str>>(addresses: &[S]) -> State {
    let list: Vec<&str> = addresses.iter().map(AsRef::as_ref).collect();
    State::new(serde_json::to_vec(&list).unwrap_or_default())
}

/// Decode the addresses in a simulated state.
pub fn addresses(state: &State) -> Vec<String> {
    serde_json::from_slice(state.bytes()).unwrap_or_default()
}

fn exit(command: &str, code: i32, stdout: &str, stderr: &str) -> TfError {
    TfError::Exit {
        command: command.to_string(),
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

fn matches_address(address: &str, pattern: &str) -> bool {
    address == pattern
        || address
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
}

fn move_within(list: &mut [String], source: &str, destination: &str, command: &str) -> Result<(), TfError> {
    let mut moved = false;
    for address in list.iter_mut() {
        if matches_address(address, source) {
            *address = format!("{}{}", destination, &address[source.len()..]);
            moved = true;
        }
    }
    if moved {
        Ok(())
    } else {
        Err(exit(command, 1, "", &format!("Invalid source address: {}", source)))
    }
}

#[async_trait]
impl TerraformCli for MockTerraform {
    fn dir(&self) -> &Path {
        &self.dir
    }

    async fn version(&self) -> Result<TerraformVersion, TfError> {
        self.enter("version".to_string()).await?;
        Ok(self.inner.lock().version.clone())
    }

    async fn init(&self, opts: &[&str]) -> Result<(), TfError> {
        self.enter(format!("init {}", opts.join(" ")).trim_end().to_string()).await
    }

    async fn workspace_select(&self, workspace: &str) -> Result<(), TfError> {
        self.enter(format!("workspace select {}", workspace)).await
    }

    async fn plan(&self, state: &StateSource, opts: &[&str]) -> Result<Plan, TfError> {
        let command = format!("plan {}", opts.join(" ")).trim_end().to_string();
        self.enter(command.clone()).await?;

        let inner = self.inner.lock();
        let planned = match state {
            StateSource::Remote => addresses(&inner.remote),
            StateSource::Explicit(state) => addresses(state),
        };

        if let Some(expected) = &inner.expected {
            let mut planned = planned;
            let mut expected = expected.clone();
            planned.sort();
            expected.sort();
            if planned != expected {
                return Err(exit(
                    &command,
                    2,
                    &format!("expected {:?}, planned {:?}", expected, planned),
                    "",
                ));
            }
        }

        Ok(Plan::new(b"mock-plan".to_vec()))
    }

    async fn apply(&self, _plan: Option<&Plan>, opts: &[&str]) -> Result<(), TfError> {
        self.enter(format!("apply {}", opts.join(" ")).trim_end().to_string()).await
    }

    async fn state_list(
        &self,
        state: &StateSource,
        filter: &[String],
    ) -> Result<Vec<String>, TfError> {
        self.enter("state list".to_string()).await?;

        let list = match state {
            StateSource::Remote => addresses(&self.inner.lock().remote),
            StateSource::Explicit(state) => addresses(state),
        };
        Ok(list
            .into_iter()
            .filter(|a| filter.is_empty() || filter.iter().any(|f| matches_address(a, f)))
            .collect())
    }

    async fn state_pull(&self) -> Result<State, TfError> {
        self.enter("state pull".to_string()).await?;
        Ok(self.inner.lock().remote.clone())
    }

    async fn state_push(&self, state: &State) -> Result<(), TfError> {
        self.enter("state push".to_string()).await?;
        self.inner.lock().remote = state.clone();
        Ok(())
    }

    async fn state_mv(
        &self,
        state: &State,
        state_out: Option<&State>,
        source: &str,
        destination: &str,
    ) -> Result<(State, Option<State>), TfError> {
        let command = format!("state mv {} {}", source, destination);
        self.enter(command.clone()).await?;

        let mut from = addresses(state);
        match state_out {
            None => {
                move_within(&mut from, source, destination, &command)?;
                Ok((state_of(&from), None))
            }
            Some(out) => {
                let mut to = addresses(out);
                let (moving, staying): (Vec<String>, Vec<String>) =
                    from.into_iter().partition(|a| matches_address(a, source));
                if moving.is_empty() {
                    return Err(exit(&command, 1, "", &format!("Invalid source address: {}", source)));
                }
                for address in moving {
                    to.push(format!("{}{}", destination, &address[source.len()..]));
                }
                Ok((state_of(&staying), Some(state_of(&to))))
            }
        }
    }

    async fn state_rm(&self, state: &State, targets: &[String]) -> Result<State, TfError> {
        let command = format!("state rm {}", targets.join(" "));
        self.enter(command.clone()).await?;

        let mut list = addresses(state);
        for target in targets {
            let before = list.len();
            list.retain(|a| !matches_address(a, target));
            if list.len() == before {
                return Err(exit(&command, 1, "", &format!("No matching objects found: {}", target)));
            }
        }
        Ok(state_of(&list))
    }

    async fn state_import(
        &self,
        state: &State,
        address: &str,
        id: &str,
    ) -> Result<State, TfError> {
        let command = format!("import {} {}", address, id);
        self.enter(command.clone()).await?;

        let mut list = addresses(state);
        if list.iter().any(|a| a == address) {
            return Err(exit(&command, 1, "", &format!("Resource already managed: {}", address)));
        }
        list.push(address.to_string());
        Ok(state_of(&list))
    }

    async fn state_replace_provider(
        &self,
        state: &State,
        source: &str,
        destination: &str,
    ) -> Result<State, TfError> {
        self.enter(format!("state replace-provider {} {}", source, destination)).await?;
        Ok(state_of(&addresses(state)))
    }
}

/// Hands out one [`MockTerraform`] per directory, all sharing a call log.
#[derive(Debug, Default)]
pub struct MockProvider {
    log: CallLog,
    dirs: Mutex<HashMap<PathBuf, Arc<MockTerraform>>>,
}

impl MockProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulator for its directory. Its log is replaced by the
    /// provider's shared log.
    pub fn register(&self, tf: MockTerraform) -> Arc<MockTerraform> {
        let tf = Arc::new(tf.with_log(self.log()));
        self.dirs
            .lock()
            .insert(tf.dir.clone(), Arc::clone(&tf));
        tf
    }

    /// The shared call log.
    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    /// Snapshot of every recorded call.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl TerraformProvider for MockProvider {
    fn open(&self, dir: &Path) -> Arc<dyn TerraformCli> {
        let mut dirs = self.dirs.lock();
        let tf = dirs
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(MockTerraform::new(dir).with_log(Arc::clone(&self.log))));
        Arc::clone(tf) as Arc<dyn TerraformCli>
    }
}
