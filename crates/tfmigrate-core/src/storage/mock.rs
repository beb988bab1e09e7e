//! In-memory history storage.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{Storage, StorageError};

/// Configuration for [`MockStorage`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockStorageConfig {
    /// Initial contents of the history file.
    pub data: String,
    /// Make every write fail.
    pub write_error: bool,
    /// Make every read fail.
    pub read_error: bool,
    /// Make every unlock fail, leaving the lock held.
    pub unlock_error: bool,
}

#[derive(Debug, Default)]
struct MockState {
    data: Vec<u8>,
    locked: bool,
    lock_calls: usize,
    unlock_calls: usize,
    writes: usize,
}

/// Storage that keeps the history file in memory.
#[derive(Debug)]
pub struct MockStorage {
    config: MockStorageConfig,
    state: Mutex<MockState>,
}

impl MockStorage {
    /// Create a mock backend seeded from the config.
    pub fn new(config: MockStorageConfig) -> Self {
        let state = MockState {
            data: config.data.clone().into_bytes(),
            ..MockState::default()
        };

        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Create an empty mock backend.
    pub fn empty() -> Self {
        Self::new(MockStorageConfig::default())
    }

    /// Current stored bytes.
    pub fn data(&self) -> Vec<u8> {
        self.state.lock().data.clone()
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Pre-acquire the lock, as if another process held it.
    pub fn hold_lock(&self) {
        self.state.lock().locked = true;
    }

    /// Number of `write_lock` calls, successful or not.
    pub fn lock_calls(&self) -> usize {
        self.state.lock().lock_calls
    }

    /// Number of `unlock` calls.
    pub fn unlock_calls(&self) -> usize {
        self.state.lock().unlock_calls
    }

    /// Number of successful writes.
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn write(&self, bytes: &[u8]) -> Result<(), StorageError> {
        if self.config.write_error {
            return Err(StorageError::Injected("failed to write mock storage".to_string()));
        }

        let mut state = self.state.lock();
        state.data = bytes.to_vec();
        state.writes += 1;
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, StorageError> {
        if self.config.read_error {
            return Err(StorageError::Injected("failed to read mock storage".to_string()));
        }

        Ok(self.state.lock().data.clone())
    }

    async fn write_lock(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.lock_calls += 1;
        if state.locked {
            return Err(StorageError::Locked {
                target: "mock".to_string(),
            });
        }
        state.locked = true;
        Ok(())
    }

    async fn unlock(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.unlock_calls += 1;
        if self.config.unlock_error {
            return Err(StorageError::Injected("failed to unlock mock storage".to_string()));
        }
        state.locked = false;
        Ok(())
    }
}
