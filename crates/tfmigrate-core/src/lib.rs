//! tfmigrate core - history controller, state actions and migrators.
//!
//! This crate provides everything tfmigrate needs except the command line
//! and the object-store history backends.

pub mod action;
pub mod config;
pub mod error;
pub mod history;
pub mod migrator;
pub mod runner;
pub mod storage;
pub mod tfexec;

pub use action::{ActionError, MultiStateAction, StateAction, WildcardExpander};
pub use config::{Config, HistoryConfig};
pub use error::Error;
pub use history::{History, HistoryController, HistoryError, Record};
pub use migrator::{
    MigrateError, MigrationConfig, Migrator, MultiStateMigratorConfig, StateMigratorConfig,
};
pub use runner::{FileRunner, HistoryRunner};
pub use storage::{LocalStorage, MockStorage, Storage, StorageConfig, StorageError};
pub use tfexec::{
    CommandProvider, State, StateSource, TerraformCli, TerraformProvider, TerraformVersion,
    TfError,
};

/// Re-export of the cancellation token accepted by [`HistoryRunner::apply`].
pub use tokio_util::sync::CancellationToken;
