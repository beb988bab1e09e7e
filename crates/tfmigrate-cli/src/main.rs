//! tfmigrate - terraform state migration tool.
//!
//! Applies `mv`, `rm`, `import` and `replace-provider` migrations to
//! terraform states, verifies them with a plan, and records what has been
//! applied.

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{Context, ListStatus};
use tfmigrate_core::config::{ENV_CONFIG, ENV_LOG};
use tfmigrate_core::{CancellationToken, CommandProvider, Config};

/// Terraform state migration tool
#[derive(Parser, Debug)]
#[command(name = "tfmigrate")]
#[command(version, about = "A terraform state migration tool for GitOps")]
pub struct Args {
    /// Configuration file (default: .tfmigrate.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Terraform command, e.g. "terragrunt" or "direnv exec . terraform"
    #[arg(long)]
    pub exec_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Compute and verify migrations without changing any state
    Plan {
        /// Migration file. Optional when history is configured.
        path: Option<PathBuf>,
    },

    /// Compute, verify and push migrations
    Apply {
        /// Migration file. Optional when history is configured.
        path: Option<PathBuf>,
    },

    /// List migrations known to the history
    List {
        /// Which migrations to list
        #[arg(long, value_enum, default_value = "all")]
        status: ListStatus,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(ENV_LOG)
                .unwrap_or_else(|_| "tfmigrate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from));
    let mut config =
        Config::load(config_path.as_deref())?.with_env_overrides(|key| std::env::var(key).ok());
    if let Some(exec_path) = &args.exec_path {
        config = config.with_exec_path(exec_path.clone());
    }

    tracing::debug!(
        migration_dir = %config.migration_dir.display(),
        exec_path = %config.exec_path,
        history = config.history_enabled(),
        "configuration loaded"
    );

    let provider = Arc::new(CommandProvider::new(config.exec_path.clone()));
    let ctx = Context::new(config, provider);

    match args.command {
        Command::Plan { path } => ctx.plan(path.as_deref()).await?,
        Command::Apply { path } => {
            let token = CancellationToken::new();

            // Cancel the run on ctrl-c
            let canceller = token.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for ctrl+c");
                    return;
                }
                tracing::warn!("received interrupt, cancelling");
                canceller.cancel();
            });

            ctx.apply(path.as_deref(), &token).await?;
        }
        Command::List { status } => {
            for id in ctx.list(status).await? {
                println!("{}", id);
            }
        }
    }

    Ok(())
}
