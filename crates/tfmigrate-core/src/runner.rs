//! Runners - sequence migration files and keep the history up to date.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::history::HistoryController;
use crate::migrator::{load_migration, Migrator};
use crate::storage::Storage;
use crate::tfexec::TerraformProvider;

/// Load a migration file and build its migrator.
async fn open_migrator(
    path: &Path,
    file: &str,
    provider: &dyn TerraformProvider,
) -> Result<Migrator, Error> {
    let wrap = |source| Error::Migration {
        file: file.to_string(),
        source,
    };
    let config = load_migration(path).await.map_err(wrap)?;
    Migrator::from_config(&config, provider).map_err(wrap)
}

fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Runs a single migration file without consulting the history.
pub struct FileRunner {
    path: PathBuf,
    provider: Arc<dyn TerraformProvider>,
}

impl FileRunner {
    /// Create a runner for the migration file at `path`.
    pub fn new(path: impl Into<PathBuf>, provider: Arc<dyn TerraformProvider>) -> Self {
        Self {
            path: path.into(),
            provider,
        }
    }

    /// Plan the migration.
    pub async fn plan(&self) -> Result<(), Error> {
        let file = file_id(&self.path);
        let migrator = open_migrator(&self.path, &file, self.provider.as_ref()).await?;
        migrator
            .plan()
            .await
            .map_err(|source| Error::Migration { file, source })
    }

    /// Apply the migration.
    pub async fn apply(&self) -> Result<(), Error> {
        let file = file_id(&self.path);
        let migrator = open_migrator(&self.path, &file, self.provider.as_ref()).await?;
        migrator
            .apply()
            .await
            .map_err(|source| Error::Migration { file, source })
    }
}

/// Runs migrations and records them in the history.
///
/// With a file name the runner handles that one migration and refuses it if
/// it is already applied. Without one it handles every unapplied migration
/// in the directory, in catalog order.
pub struct HistoryRunner {
    filename: Option<String>,
    controller: HistoryController,
    provider: Arc<dyn TerraformProvider>,
}

impl HistoryRunner {
    /// Load the catalog and history for `migration_dir`.
    pub async fn new(
        filename: Option<String>,
        migration_dir: impl Into<PathBuf>,
        storage: Arc<dyn Storage>,
        provider: Arc<dyn TerraformProvider>,
    ) -> Result<Self, Error> {
        let controller = HistoryController::load(migration_dir, storage).await?;

        if let Some(filename) = &filename {
            if controller.already_applied(filename) {
                return Err(Error::AlreadyApplied(filename.clone()));
            }
        }

        Ok(Self {
            filename,
            controller,
            provider,
        })
    }

    /// The history controller.
    pub fn controller(&self) -> &HistoryController {
        &self.controller
    }

    /// Migration files this runner would process, in order.
    pub fn pending(&self) -> Vec<String> {
        match &self.filename {
            Some(filename) => vec![filename.clone()],
            None => self.controller.unapplied_migrations(),
        }
    }

    /// Plan the pending migrations. Never locks or records history.
    pub async fn plan(&self) -> Result<(), Error> {
        let pending = self.pending();
        if pending.is_empty() {
            tracing::info!("no unapplied migrations");
            return Ok(());
        }

        for file in pending {
            tracing::info!(file = %file, "planning migration");
            let migrator = self.migrator(&file).await?;
            migrator
                .plan()
                .await
                .map_err(|source| Error::Migration { file, source })?;
        }
        Ok(())
    }

    /// Apply the pending migrations under the history lock.
    ///
    /// Stops at the first failure. Successful migrations are recorded and the
    /// history is saved whenever a record was added, then the lock is
    /// released, whatever the outcome of the batch.
    pub async fn apply(&mut self, token: &CancellationToken) -> Result<(), Error> {
        self.controller.lock_state().await.map_err(Error::Lock)?;

        let records_before = self.controller.history_len();
        let primary = self.apply_pending(token).await.err();

        let save = if self.controller.history_len() != records_before {
            self.controller.save().await.err()
        } else {
            tracing::debug!("history unchanged, skipping save");
            None
        };

        let unlock = self.controller.unlock_state().await.err();
        if let Some(err) = &unlock {
            tracing::error!(error = %err, "failed to unlock history");
        }

        Error::combine(primary, save, unlock)
    }

    async fn apply_pending(&mut self, token: &CancellationToken) -> Result<(), Error> {
        let pending = self.pending();
        if pending.is_empty() {
            tracing::info!("no unapplied migrations");
            return Ok(());
        }

        for file in pending {
            if token.is_cancelled() {
                return Err(Error::Cancelled { file });
            }

            tracing::info!(file = %file, "applying migration");
            let migrator = self.migrator(&file).await?;

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::warn!(file = %file, "cancelled during migration");
                    return Err(Error::Cancelled { file });
                }
                result = migrator.apply() => result,
            };
            result.map_err(|source| Error::Migration {
                file: file.clone(),
                source,
            })?;

            self.controller
                .add_record(&file, migrator.migration_type(), migrator.name(), None);
            tracing::info!(file = %file, "migration applied");
        }
        Ok(())
    }

    async fn migrator(&self, file: &str) -> Result<Migrator, Error> {
        let path = self.controller.migration_dir().join(file);
        open_migrator(&path, file, self.provider.as_ref()).await
    }
}
