//! Byte-level persistence for the migration history file.
//!
//! A [`Storage`] backend knows how to read and write one opaque blob and how
//! to take an advisory lock next to it. It carries no domain logic, so the
//! history controller works unchanged against a local file, an in-memory
//! mock or an object store.
//!
//! # Lock protocol
//!
//! | Call | Lock absent | Lock held |
//! |------|-------------|-----------|
//! | `write_lock` | creates the marker | [`StorageError::Locked`] |
//! | `unlock` | no-op | removes the marker |
//!
//! Locks never block or retry. Contention is resolved by whoever started the
//! other run.

pub mod local;
pub mod mock;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalStorage;
pub use mock::{MockStorage, MockStorageConfig};

/// Suffix appended to a backend's target to name its lock marker.
pub const LOCK_SUFFIX: &str = ".lock";

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error on a local path.
    #[error("io error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The lock marker already exists.
    #[error("failed to acquire lock: {target} is already locked")]
    Locked {
        /// The lock marker that is held.
        target: String,
    },

    /// Error reported by a remote backend.
    #[error("backend error on {target}: {source}")]
    Backend {
        /// Object key or path the call was made against.
        target: String,
        /// The backend's own error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error injected by the mock backend.
    #[error("{0}")]
    Injected(String),

    /// The backend is not available in this build.
    #[error("unsupported storage backend: {0}")]
    Unsupported(String),
}

/// Persistence capability for the history file.
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Replace the stored bytes.
    async fn write(&self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Read the stored bytes. Returns an empty vector if nothing is stored yet.
    async fn read(&self) -> Result<Vec<u8>, StorageError>;

    /// Acquire the lock, failing immediately if it is already held.
    async fn write_lock(&self) -> Result<(), StorageError>;

    /// Release the lock. Releasing an absent lock succeeds.
    async fn unlock(&self) -> Result<(), StorageError>;
}

/// Storage backend selection, as written in the `[history.storage]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// A file on the local filesystem.
    Local {
        /// Path of the history file.
        path: PathBuf,
    },

    /// In-memory storage, for tests and dry runs.
    Mock(MockStorageConfig),

    /// An S3 (or S3-compatible) object.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Object key of the history file.
        key: String,
        /// AWS region.
        #[serde(default)]
        region: Option<String>,
        /// Custom endpoint for S3-compatible services.
        #[serde(default)]
        endpoint: Option<String>,
    },

    /// A Google Cloud Storage object.
    Gcs {
        /// Bucket name.
        bucket: String,
        /// Object name of the history file.
        name: String,
    },

    /// An Azure blob.
    Azure {
        /// Storage account name.
        account: String,
        /// Container name.
        container: String,
        /// Blob name of the history file.
        blob: String,
    },
}

impl StorageConfig {
    /// Short backend name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Local { .. } => "local",
            StorageConfig::Mock(_) => "mock",
            StorageConfig::S3 { .. } => "s3",
            StorageConfig::Gcs { .. } => "gcs",
            StorageConfig::Azure { .. } => "azure",
        }
    }
}

/// Open a backend that lives in this crate.
///
/// Object-store backends are provided by the remote crate and are rejected
/// here with [`StorageError::Unsupported`].
pub fn open(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    match config {
        StorageConfig::Local { path } => Ok(Arc::new(LocalStorage::new(path))),
        StorageConfig::Mock(mock) => Ok(Arc::new(MockStorage::new(mock.clone()))),
        other => Err(StorageError::Unsupported(other.kind().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_from_toml() {
        let config: StorageConfig =
            toml::from_str("type = \"local\"\npath = \"tmp/history.json\"").unwrap();
        assert_eq!(
            config,
            StorageConfig::Local {
                path: PathBuf::from("tmp/history.json")
            }
        );

        let config: StorageConfig =
            toml::from_str("type = \"s3\"\nbucket = \"b\"\nkey = \"k/history.json\"").unwrap();
        assert_eq!(config.kind(), "s3");
    }

    #[test]
    fn test_open_rejects_remote_backends() {
        let config = StorageConfig::Gcs {
            bucket: "b".to_string(),
            name: "history.json".to_string(),
        };
        assert!(matches!(
            open(&config),
            Err(StorageError::Unsupported(kind)) if kind == "gcs"
        ));
    }
}
