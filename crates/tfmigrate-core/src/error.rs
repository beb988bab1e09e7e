//! Top-level error types.

use std::fmt;

use thiserror::Error;

use crate::history::HistoryError;
use crate::migrator::MigrateError;
use crate::storage::StorageError;

/// Errors returned by the runners.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid tool or migration configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The history could not be loaded.
    #[error("history error: {0}")]
    History(#[from] HistoryError),

    /// The history lock could not be acquired.
    #[error("failed to lock history: {0}")]
    Lock(#[source] StorageError),

    /// The requested migration has a history record.
    #[error("migration {0} is already applied")]
    AlreadyApplied(String),

    /// A migration failed.
    #[error("migration {file} failed: {source}")]
    Migration {
        /// Migration file id.
        file: String,
        /// The underlying error.
        #[source]
        source: MigrateError,
    },

    /// The run was cancelled while `file` was in progress.
    #[error("cancelled while applying {file}")]
    Cancelled {
        /// Migration file id.
        file: String,
    },

    /// Migrations were applied but the history could not be written.
    #[error("migrations were applied but the history was not saved: {0}")]
    HistorySave(#[source] HistoryError),

    /// The history lock could not be released.
    #[error("failed to unlock history: {0}")]
    Unlock(#[source] StorageError),

    /// Several independent failures, in the order they happened.
    #[error("{}", DisplayMultiple(.0))]
    Multiple(Vec<Error>),
}

struct DisplayMultiple<'a>(&'a [Error]);

impl fmt::Display for DisplayMultiple<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for err in self.0 {
            write!(f, "\n  * {}", err)?;
        }
        Ok(())
    }
}

impl Error {
    /// Merge the outcome of a batch with its save and unlock results.
    ///
    /// Returns `Ok` only when all three are absent. A single error is
    /// returned as is; several are kept in order primary, save, unlock.
    pub fn combine(
        primary: Option<Error>,
        save: Option<HistoryError>,
        unlock: Option<StorageError>,
    ) -> Result<(), Error> {
        let mut errors: Vec<Error> = primary.into_iter().collect();
        errors.extend(save.map(Error::HistorySave));
        errors.extend(unlock.map(Error::Unlock));

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    /// Errors contained in this one, flattened.
    pub fn errors(&self) -> Vec<&Error> {
        match self {
            Error::Multiple(errors) => errors.iter().flat_map(Error::errors).collect(),
            other => vec![other],
        }
    }

    /// Whether a migration failed verification.
    pub fn is_drift(&self) -> bool {
        self.errors().iter().any(|e| {
            matches!(e, Error::Migration { source, .. } if source.is_drift())
        })
    }

    /// Whether the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.errors()
            .iter()
            .any(|e| matches!(e, Error::Cancelled { .. }))
    }

    /// Whether applied migrations are missing from the persisted history.
    pub fn history_is_stale(&self) -> bool {
        self.errors()
            .iter()
            .any(|e| matches!(e, Error::HistorySave(_)))
    }
}
