//! History storage backed by a local file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Storage, StorageError, LOCK_SUFFIX};

/// Stores the history file at a local path.
///
/// The lock marker lives next to it at `<path>.lock`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    path: PathBuf,
    lock_path: PathBuf,
}

impl LocalStorage {
    /// Create a backend for the given history file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(LOCK_SUFFIX);

        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    /// Path of the history file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock marker.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn io_error(path: &Path, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error(parent, e))?;
        }

        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| Self::io_error(&self.path, e))
    }

    async fn read(&self) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "history file not found, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(Self::io_error(&self.path, e)),
        }
    }

    async fn write_lock(&self) -> Result<(), StorageError> {
        let result = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(lock = %self.lock_path.display(), "lock acquired");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StorageError::Locked {
                target: self.lock_path.display().to_string(),
            }),
            Err(e) => Err(Self::io_error(&self.lock_path, e)),
        }
    }

    async fn unlock(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.lock_path).await {
            Ok(()) => {
                tracing::debug!(lock = %self.lock_path.display(), "lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&self.lock_path, e)),
        }
    }
}
