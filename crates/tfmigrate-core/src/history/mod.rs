//! Migration history: which migrations have been applied.
//!
//! - [`History`] is the in-memory ledger keyed by migration file name.
//! - [`file`] converts it to and from the versioned JSON wire format.
//! - [`HistoryController`] ties the ledger to a migration directory and a
//!   [`Storage`](crate::storage::Storage) backend.

pub mod controller;
pub mod file;
pub mod record;

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

pub use controller::{HistoryController, MIGRATION_FILE_EXTENSIONS};
pub use file::{parse_history, serialize_history, HISTORY_FILE_VERSION};
pub use record::{History, Record};

/// History errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The history file declares a version this build does not understand.
    #[error("unknown history file version: {0}")]
    UnknownVersion(u64),

    /// The history file is not valid JSON for its declared version.
    #[error("failed to parse history file: {0}")]
    Parse(#[source] serde_json::Error),

    /// The history could not be serialized.
    #[error("failed to serialize history: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The migration directory could not be listed.
    #[error("failed to read migration directory {path}: {source}")]
    ReadDir {
        /// The migration directory.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
