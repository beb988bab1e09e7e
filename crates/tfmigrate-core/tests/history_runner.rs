//! Integration tests for history-aware migration runs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use tfmigrate_core::history::parse_history;
use tfmigrate_core::storage::{MockStorage, MockStorageConfig};
use tfmigrate_core::tfexec::mock::{MockProvider, MockTerraform};
use tfmigrate_core::{CancellationToken, Error, HistoryController, HistoryRunner};

struct TestContext {
    dir: TempDir,
    storage: Arc<MockStorage>,
    provider: Arc<MockProvider>,
}

impl TestContext {
    fn new() -> Self {
        Self::with_history("")
    }

    fn with_history(data: &str) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            storage: Arc::new(MockStorage::new(MockStorageConfig {
                data: data.to_string(),
                ..MockStorageConfig::default()
            })),
            provider: Arc::new(MockProvider::new()),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write_state_migration(&self, file: &str, tf_dir: &str, actions: &[&str]) {
        let actions = actions
            .iter()
            .map(|a| format!("{:?}", a))
            .collect::<Vec<_>>()
            .join(", ");
        std::fs::write(
            self.path().join(file),
            format!(
                "[migration]\ntype = \"state\"\nname = \"{}\"\ndir = \"{}\"\nactions = [{}]\n",
                file.trim_end_matches(".toml"),
                tf_dir,
                actions
            ),
        )
        .unwrap();
    }

    async fn runner(&self, filename: Option<&str>) -> HistoryRunner {
        let result = HistoryRunner::new(
            filename.map(str::to_string),
            self.path(),
            self.storage.clone(),
            self.provider.clone(),
        )
        .await;
        match result {
            Ok(runner) => runner,
            Err(e) => panic!("failed to create runner: {}", e),
        }
    }

    fn persisted(&self) -> tfmigrate_core::History {
        parse_history(&self.storage.data()).unwrap()
    }
}

const TWO_APPLIED: &str = r#"{
    "version": 1,
    "records": {
        "20240101000001_first.toml": {
            "type": "state",
            "name": "first",
            "applied_at": "2024-01-01T00:00:01Z"
        },
        "20240101000002_second.toml": {
            "type": "state",
            "name": "second",
            "applied_at": "2024-01-01T00:00:02Z"
        }
    }
}"#;

#[tokio::test]
async fn test_empty_directory_bootstrap() {
    let ctx = TestContext::new();

    let controller = HistoryController::load(ctx.path(), ctx.storage.clone())
        .await
        .unwrap();
    assert!(controller.migrations().is_empty());
    assert!(controller.unapplied_migrations().is_empty());

    let mut runner = ctx.runner(None).await;
    runner.plan().await.unwrap();
    runner.apply(&CancellationToken::new()).await.unwrap();

    assert_eq!(ctx.storage.writes(), 0);
    assert_eq!(ctx.storage.lock_calls(), 1);
    assert_eq!(ctx.storage.unlock_calls(), 1);
}

#[tokio::test]
async fn test_apply_all_unapplied_in_order() {
    let ctx = TestContext::with_history(TWO_APPLIED);
    ctx.write_state_migration("20240101000001_first.toml", "dir1", &["mv a.old a.first"]);
    ctx.write_state_migration("20240101000002_second.toml", "dir1", &["mv a.old a.second"]);
    ctx.write_state_migration("20240101000004_fourth.toml", "dir1", &["mv a.third a.fourth"]);
    ctx.write_state_migration("20240101000003_third.toml", "dir1", &["mv a.start a.third"]);

    let tf = ctx
        .provider
        .register(MockTerraform::new("dir1").with_remote(&["a.start"]));

    let mut runner = ctx.runner(None).await;
    assert_eq!(
        runner.pending(),
        vec!["20240101000003_third.toml", "20240101000004_fourth.toml"]
    );

    let before = Utc::now();
    runner.apply(&CancellationToken::new()).await.unwrap();
    let after = Utc::now();

    assert_eq!(tf.remote_addresses(), vec!["a.fourth"]);
    let moves: Vec<String> = tf
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("state mv"))
        .collect();
    assert_eq!(moves, vec!["state mv a.start a.third", "state mv a.third a.fourth"]);

    let history = ctx.persisted();
    assert_eq!(history.len(), 4);
    assert_eq!(
        history.get("20240101000001_first.toml").unwrap().applied_at,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap()
    );
    for id in ["20240101000003_third.toml", "20240101000004_fourth.toml"] {
        let record = history.get(id).unwrap();
        assert_eq!(record.migration_type, "state");
        assert!(record.applied_at >= before && record.applied_at <= after);
    }
    assert_eq!(ctx.storage.unlock_calls(), 1);
    assert!(!ctx.storage.is_locked());
}

#[tokio::test]
async fn test_failure_keeps_earlier_records() {
    let ctx = TestContext::new();
    ctx.write_state_migration("1_ok.toml", "dir1", &["mv a.x a.y"]);
    ctx.write_state_migration("2_broken.toml", "dir1", &["mv a.missing a.z"]);
    ctx.write_state_migration("3_never.toml", "dir1", &["mv a.y a.w"]);

    let tf = ctx.provider.register(MockTerraform::new("dir1").with_remote(&["a.x"]));

    let mut runner = ctx.runner(None).await;
    let err = runner.apply(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::Migration { ref file, .. } if file == "2_broken.toml"));
    let history = ctx.persisted();
    assert!(history.contains("1_ok.toml"));
    assert!(!history.contains("2_broken.toml"));
    assert!(!history.contains("3_never.toml"));
    assert_eq!(ctx.storage.writes(), 1);
    assert_eq!(ctx.storage.unlock_calls(), 1);
    assert_eq!(tf.remote_addresses(), vec!["a.y"]);
}

#[tokio::test]
async fn test_drift_is_not_pushed_or_recorded() {
    let ctx = TestContext::new();
    ctx.write_state_migration("1_mv.toml", "dir1", &["mv a.x a.y"]);

    let tf = ctx.provider.register(
        MockTerraform::new("dir1")
            .with_remote(&["a.x"])
            .with_expected(&["a.x"]),
    );

    let mut runner = ctx.runner(None).await;
    let err = runner.apply(&CancellationToken::new()).await.unwrap_err();

    assert!(err.is_drift());
    assert!(!tf.calls().contains(&"state push".to_string()));
    assert_eq!(tf.remote_addresses(), vec!["a.x"]);
    assert_eq!(ctx.storage.writes(), 0);
    assert_eq!(ctx.storage.unlock_calls(), 1);
}

#[tokio::test]
async fn test_multi_state_pushes_destination_first() {
    let ctx = TestContext::new();
    std::fs::write(
        ctx.path().join("1_split.json"),
        r#"{
            "migration": {
                "type": "multi_state",
                "name": "split",
                "from_dir": "dir1",
                "to_dir": "dir2",
                "actions": ["xmv null_resource.* null_resource.$1"]
            }
        }"#,
    )
    .unwrap();

    let from = ctx.provider.register(
        MockTerraform::new("dir1")
            .with_remote(&["null_resource.foo", "aws_instance.web"])
            .with_expected(&["aws_instance.web"]),
    );
    let to = ctx.provider.register(
        MockTerraform::new("dir2").with_expected(&["null_resource.foo"]),
    );

    let mut runner = ctx.runner(None).await;
    runner.apply(&CancellationToken::new()).await.unwrap();

    let pushes: Vec<String> = ctx
        .provider
        .calls()
        .into_iter()
        .filter(|c| c.ends_with("state push"))
        .collect();
    assert_eq!(pushes, vec!["dir2: state push", "dir1: state push"]);
    assert_eq!(from.remote_addresses(), vec!["aws_instance.web"]);
    assert_eq!(to.remote_addresses(), vec!["null_resource.foo"]);
    assert_eq!(
        ctx.persisted().get("1_split.json").unwrap().migration_type,
        "multi_state"
    );
}

#[tokio::test]
async fn test_save_failure_is_reported_distinctly() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = TestContext {
        dir,
        storage: Arc::new(MockStorage::new(MockStorageConfig {
            write_error: true,
            ..MockStorageConfig::default()
        })),
        provider: Arc::new(MockProvider::new()),
    };
    ctx.write_state_migration("1_mv.toml", "dir1", &["mv a.x a.y"]);
    let tf = ctx.provider.register(MockTerraform::new("dir1").with_remote(&["a.x"]));

    let mut runner = ctx.runner(None).await;
    let err = runner.apply(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::HistorySave(_)));
    assert!(err.history_is_stale());
    assert!(!err.is_drift());
    assert_eq!(tf.remote_addresses(), vec!["a.y"]);
    assert_eq!(ctx.storage.unlock_calls(), 1);
}

#[tokio::test]
async fn test_unlock_failure_does_not_mask_migration_error() {
    let ctx = TestContext {
        dir: tempfile::tempdir().unwrap(),
        storage: Arc::new(MockStorage::new(MockStorageConfig {
            unlock_error: true,
            ..MockStorageConfig::default()
        })),
        provider: Arc::new(MockProvider::new()),
    };
    ctx.write_state_migration("1_ok.toml", "dir1", &["mv a.x a.y"]);
    ctx.write_state_migration("2_broken.toml", "dir1", &["mv a.missing a.z"]);
    ctx.provider
        .register(MockTerraform::new("dir1").with_remote(&["a.x"]));

    let mut runner = ctx.runner(None).await;
    let err = runner.apply(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::Multiple(_)));
    let errors = err.errors();
    assert_eq!(errors.len(), 2);
    assert!(matches!(errors[0], Error::Migration { ref file, .. } if file == "2_broken.toml"));
    assert!(matches!(errors[1], Error::Unlock(_)));
    assert!(!err.history_is_stale());

    assert_eq!(ctx.storage.writes(), 1);
    assert!(ctx.persisted().contains("1_ok.toml"));
    assert_eq!(ctx.storage.unlock_calls(), 1);
    assert!(ctx.storage.is_locked());
}

#[tokio::test]
async fn test_single_file_mode() {
    let ctx = TestContext::new();
    ctx.write_state_migration("1_a.toml", "dir1", &["rm a.x"]);
    ctx.write_state_migration("2_b.toml", "dir1", &["rm a.y"]);
    let tf = ctx
        .provider
        .register(MockTerraform::new("dir1").with_remote(&["a.x", "a.y"]));

    let mut runner = ctx.runner(Some("2_b.toml")).await;
    assert_eq!(runner.pending(), vec!["2_b.toml"]);
    runner.apply(&CancellationToken::new()).await.unwrap();

    assert_eq!(tf.remote_addresses(), vec!["a.x"]);
    let history = ctx.persisted();
    assert_eq!(history.len(), 1);
    assert!(history.contains("2_b.toml"));

    let err = HistoryRunner::new(
        Some("2_b.toml".to_string()),
        ctx.path(),
        ctx.storage.clone(),
        ctx.provider.clone(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, Error::AlreadyApplied(_)));
}

#[tokio::test]
async fn test_cancel_mid_migration_saves_and_unlocks() {
    let ctx = TestContext::new();
    ctx.write_state_migration("1_done.toml", "dir1", &["rm a.x"]);
    ctx.write_state_migration("2_stuck.toml", "dir2", &["rm b.x"]);

    ctx.provider
        .register(MockTerraform::new("dir1").with_remote(&["a.x"]));
    let stuck = ctx.provider.register(
        MockTerraform::new("dir2")
            .with_remote(&["b.x"])
            .hanging("state pull"),
    );

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let mut runner = ctx.runner(None).await;
    let err = runner.apply(&token).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(matches!(err, Error::Cancelled { ref file } if file == "2_stuck.toml"));
    assert_eq!(stuck.remote_addresses(), vec!["b.x"]);

    let history = ctx.persisted();
    assert!(history.contains("1_done.toml"));
    assert!(!history.contains("2_stuck.toml"));
    assert_eq!(ctx.storage.unlock_calls(), 1);
    assert!(!ctx.storage.is_locked());
}
