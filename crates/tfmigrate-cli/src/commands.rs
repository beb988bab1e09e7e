//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use tfmigrate_core::{
    CancellationToken, Config, Error, FileRunner, HistoryController, HistoryError, HistoryRunner,
    Storage, TerraformProvider,
};

/// Which migrations `list` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListStatus {
    /// Every migration file in the directory.
    All,
    /// Migration files without a history record.
    Unapplied,
}

/// Shared state of one invocation.
pub struct Context {
    config: Config,
    provider: Arc<dyn TerraformProvider>,
}

impl Context {
    /// Create a context.
    pub fn new(config: Config, provider: Arc<dyn TerraformProvider>) -> Self {
        Self { config, provider }
    }

    /// Plan one migration file, or every unapplied migration.
    pub async fn plan(&self, path: Option<&Path>) -> Result<(), Error> {
        match self.history_storage()? {
            Some(storage) => self.history_runner(path, storage).await?.plan().await,
            None => FileRunner::new(require_path(path)?, self.provider.clone()).plan().await,
        }
    }

    /// Apply one migration file, or every unapplied migration.
    pub async fn apply(&self, path: Option<&Path>, token: &CancellationToken) -> Result<(), Error> {
        match self.history_storage()? {
            Some(storage) => {
                let mut runner = self.history_runner(path, storage).await?;
                runner.apply(token).await
            }
            None => {
                let path = require_path(path)?;
                let runner = FileRunner::new(path, self.provider.clone());
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(Error::Cancelled {
                        file: path.display().to_string(),
                    }),
                    result = runner.apply() => result,
                }
            }
        }
    }

    /// Migration ids with the requested status, in catalog order.
    pub async fn list(&self, status: ListStatus) -> Result<Vec<String>, Error> {
        let storage = self
            .history_storage()?
            .ok_or_else(|| Error::Config("list requires history to be configured".to_string()))?;
        let controller = HistoryController::load(&self.config.migration_dir, storage).await?;

        Ok(match status {
            ListStatus::All => controller.migrations().to_vec(),
            ListStatus::Unapplied => controller.unapplied_migrations(),
        })
    }

    fn history_storage(&self) -> Result<Option<Arc<dyn Storage>>, Error> {
        let Some(history) = &self.config.history else {
            return Ok(None);
        };
        let storage = tfmigrate_remote::open_storage(&history.storage)
            .map_err(|e| Error::History(HistoryError::Storage(e)))?;
        Ok(Some(storage))
    }

    async fn history_runner(
        &self,
        path: Option<&Path>,
        storage: Arc<dyn Storage>,
    ) -> Result<HistoryRunner, Error> {
        let filename = match path {
            Some(path) => Some(
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| {
                        Error::Config(format!("{} is not a migration file", path.display()))
                    })?,
            ),
            None => None,
        };

        HistoryRunner::new(
            filename,
            &self.config.migration_dir,
            storage,
            self.provider.clone(),
        )
        .await
    }
}

fn require_path(path: Option<&Path>) -> Result<&Path, Error> {
    path.ok_or_else(|| {
        Error::Config("a migration file is required when history is not configured".to_string())
    })
}
