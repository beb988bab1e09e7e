//! History controller - catalog, ledger and lock for one migration directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::file::{parse_history, serialize_history};
use super::record::{History, Record};
use super::HistoryError;
use crate::storage::{Storage, StorageError};

/// File extensions recognised as migration files.
pub const MIGRATION_FILE_EXTENSIONS: &[&str] = &["toml", "json"];

/// Coordinates the migration catalog with the persisted history.
///
/// The history is loaded once when the controller is created, mutated in
/// memory by [`add_record`](Self::add_record) and written back only when
/// [`save`](Self::save) is called.
#[derive(Debug)]
pub struct HistoryController {
    migration_dir: PathBuf,
    migrations: Vec<String>,
    history: History,
    storage: Arc<dyn Storage>,
}

impl HistoryController {
    /// List the migration directory and load the history from storage.
    pub async fn load(
        migration_dir: impl Into<PathBuf>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, HistoryError> {
        let migration_dir = migration_dir.into();
        let migrations = load_migration_file_names(&migration_dir).await?;

        let bytes = storage.read().await?;
        let history = parse_history(&bytes)?;

        tracing::debug!(
            dir = %migration_dir.display(),
            migrations = migrations.len(),
            records = history.len(),
            "history loaded"
        );

        Ok(Self {
            migration_dir,
            migrations,
            history,
            storage,
        })
    }

    /// The migration directory.
    pub fn migration_dir(&self) -> &Path {
        &self.migration_dir
    }

    /// All migration files, sorted by name.
    pub fn migrations(&self) -> &[String] {
        &self.migrations
    }

    /// Migration files without a history record, in catalog order.
    pub fn unapplied_migrations(&self) -> Vec<String> {
        self.migrations
            .iter()
            .filter(|id| !self.history.contains(id))
            .cloned()
            .collect()
    }

    /// Whether a migration has a history record.
    pub fn already_applied(&self, id: &str) -> bool {
        self.history.contains(id)
    }

    /// Record a successfully applied migration. Defaults `applied_at` to now.
    pub fn add_record(
        &mut self,
        id: impl Into<String>,
        migration_type: impl Into<String>,
        name: impl Into<String>,
        applied_at: Option<DateTime<Utc>>,
    ) {
        let applied_at = applied_at.unwrap_or_else(Utc::now);
        self.history
            .add(id, Record::new(migration_type, name, applied_at));
    }

    /// Number of history records.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// The loaded history.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Acquire the storage lock.
    pub async fn lock_state(&self) -> Result<(), StorageError> {
        self.storage.write_lock().await
    }

    /// Release the storage lock. Safe to call without holding it.
    pub async fn unlock_state(&self) -> Result<(), StorageError> {
        self.storage.unlock().await
    }

    /// Write the history back to storage.
    pub async fn save(&self) -> Result<(), HistoryError> {
        let bytes = serialize_history(&self.history)?;
        self.storage.write(&bytes).await?;
        tracing::info!(records = self.history.len(), "history saved");
        Ok(())
    }
}

/// Names of migration files in a directory, sorted lexicographically.
async fn load_migration_file_names(dir: &Path) -> Result<Vec<String>, HistoryError> {
    let read_dir_error = |source| HistoryError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_dir_error)?;
    let mut names = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
        let file_type = entry.file_type().await.map_err(read_dir_error)?;
        if file_type.is_dir() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if is_migration_file_name(&name) {
            names.push(name);
        }
    }

    names.sort();
    Ok(names)
}

fn is_migration_file_name(name: &str) -> bool {
    if name.starts_with('.') {
        return false;
    }

    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MIGRATION_FILE_EXTENSIONS.contains(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockStorage, MockStorageConfig};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn setup_dir(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "").unwrap();
        }
        dir
    }

    fn storage_with(data: &str) -> Arc<MockStorage> {
        Arc::new(MockStorage::new(MockStorageConfig {
            data: data.to_string(),
            ..Default::default()
        }))
    }

    const HISTORY: &str = r#"{
    "version": 1,
    "records": {
        "20201012010101_foo.toml": {
            "type": "state",
            "name": "foo",
            "applied_at": "2020-10-13T01:02:03Z"
        },
        "20201012020202_bar.toml": {
            "type": "state",
            "name": "bar",
            "applied_at": "2020-10-13T04:05:06Z"
        }
    }
}"#;

    #[test]
    fn test_is_migration_file_name() {
        assert!(is_migration_file_name("20201012010101_foo.toml"));
        assert!(is_migration_file_name("20201012010101_foo.json"));
        assert!(!is_migration_file_name(".20201012010101_foo.toml"));
        assert!(!is_migration_file_name("README.md"));
        assert!(!is_migration_file_name("toml"));
    }

    #[tokio::test]
    async fn test_empty_directory_bootstrap() {
        let dir = setup_dir(&[]);
        let controller = HistoryController::load(dir.path(), Arc::new(MockStorage::empty()))
            .await
            .unwrap();

        assert!(controller.migrations().is_empty());
        assert!(controller.unapplied_migrations().is_empty());
        assert_eq!(controller.history_len(), 0);
    }

    #[tokio::test]
    async fn test_load_filters_and_sorts() {
        let dir = setup_dir(&[
            "20201012030303_baz.json",
            "20201012010101_foo.toml",
            ".20201012000000_hidden.toml",
            "20201012020202_bar.toml",
            "README.md",
        ]);
        std::fs::create_dir(dir.path().join("20201012040404_dir.toml")).unwrap();

        let controller = HistoryController::load(dir.path(), Arc::new(MockStorage::empty()))
            .await
            .unwrap();

        assert_eq!(
            controller.migrations(),
            &[
                "20201012010101_foo.toml".to_string(),
                "20201012020202_bar.toml".to_string(),
                "20201012030303_baz.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = HistoryController::load(dir.path().join("missing"), Arc::new(MockStorage::empty()))
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::ReadDir { .. }));
    }

    #[tokio::test]
    async fn test_load_unknown_version_is_fatal() {
        let dir = setup_dir(&["20201012010101_foo.toml"]);
        let err = HistoryController::load(dir.path(), storage_with(r#"{"version": 9}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::UnknownVersion(9)));
    }

    #[tokio::test]
    async fn test_load_read_error() {
        let dir = setup_dir(&[]);
        let storage = Arc::new(MockStorage::new(MockStorageConfig {
            read_error: true,
            ..Default::default()
        }));
        let err = HistoryController::load(dir.path(), storage).await.unwrap_err();
        assert!(matches!(err, HistoryError::Storage(_)));
    }

    #[tokio::test]
    async fn test_unapplied_migrations() {
        let dir = setup_dir(&[
            "20201012010101_foo.toml",
            "20201012020202_bar.toml",
            "20201012030303_baz.toml",
            "20201012040404_qux.toml",
        ]);
        let controller = HistoryController::load(dir.path(), storage_with(HISTORY))
            .await
            .unwrap();

        assert!(controller.already_applied("20201012010101_foo.toml"));
        assert!(!controller.already_applied("20201012030303_baz.toml"));
        assert_eq!(
            controller.unapplied_migrations(),
            vec![
                "20201012030303_baz.toml".to_string(),
                "20201012040404_qux.toml".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_add_record_and_save() {
        let dir = setup_dir(&["20201012010101_foo.toml", "20201012030303_baz.toml"]);
        let storage = storage_with(HISTORY);
        let mut controller = HistoryController::load(dir.path(), storage.clone())
            .await
            .unwrap();

        let before = Utc::now();
        controller.add_record("20201012030303_baz.toml", "state", "baz", None);
        let applied_at = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        controller.add_record("20201012040404_qux.toml", "multi_state", "qux", Some(applied_at));
        assert_eq!(controller.history_len(), 4);
        assert_eq!(storage.writes(), 0);

        controller.save().await.unwrap();
        assert_eq!(storage.writes(), 1);

        let saved = parse_history(&storage.data()).unwrap();
        assert_eq!(saved.len(), 4);
        assert!(saved.get("20201012030303_baz.toml").unwrap().applied_at >= before);
        assert_eq!(saved.get("20201012040404_qux.toml").unwrap().applied_at, applied_at);
        assert_eq!(saved.get("20201012040404_qux.toml").unwrap().migration_type, "multi_state");
    }

    #[tokio::test]
    async fn test_save_write_error() {
        let dir = setup_dir(&[]);
        let storage = Arc::new(MockStorage::new(MockStorageConfig {
            write_error: true,
            ..Default::default()
        }));
        let controller = HistoryController::load(dir.path(), storage).await.unwrap();
        assert!(matches!(controller.save().await, Err(HistoryError::Storage(_))));
    }

    #[tokio::test]
    async fn test_lock_unlock() {
        let dir = setup_dir(&[]);
        let storage = Arc::new(MockStorage::empty());
        let controller = HistoryController::load(dir.path(), storage.clone())
            .await
            .unwrap();

        controller.unlock_state().await.unwrap();
        controller.lock_state().await.unwrap();
        assert!(controller.lock_state().await.is_err());
        controller.unlock_state().await.unwrap();
        controller.unlock_state().await.unwrap();
        controller.lock_state().await.unwrap();
        assert!(storage.is_locked());
    }

    proptest! {
        #[test]
        fn prop_unapplied_is_catalog_minus_history(
            catalog in prop::collection::btree_set("[0-9]{4}_[a-z]{1,6}", 0..12),
            picks in prop::collection::vec(any::<bool>(), 12),
            extra in prop::collection::vec("[0-9]{4}_[a-z]{1,6}", 0..4),
        ) {
            let migrations: Vec<String> = catalog.into_iter().collect();
            let mut history = History::new();
            let applied_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
            for (id, pick) in migrations.iter().zip(picks.iter()) {
                if *pick {
                    history.add(id.clone(), Record::new("state", "x", applied_at));
                }
            }
            for id in &extra {
                history.add(id.clone(), Record::new("state", "x", applied_at));
            }

            let controller = HistoryController {
                migration_dir: PathBuf::from("."),
                migrations: migrations.clone(),
                history: history.clone(),
                storage: Arc::new(MockStorage::empty()),
            };

            let expected: Vec<String> = migrations
                .iter()
                .filter(|id| !history.contains(id))
                .cloned()
                .collect();
            prop_assert_eq!(controller.unapplied_migrations(), expected);
        }
    }
}
