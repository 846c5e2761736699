//! Postgres Backup/Restore Tool
//!
//! Dumps a database into a local staging directory, ships it to S3-compatible
//! storage with bounded retention, and restores from either side.

// pgvault/src/main.rs
mod backup;
mod config;
mod errors;
mod report;
mod restore;
mod utils;

use clap::{CommandFactory, Parser, Subcommand};
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use backup::{BackupMode, RetentionManager};
use config::{AppConfig, EnvSource};

#[derive(Debug, Parser)]
#[command(name = "pgvault", version, about = "Postgres backup and restore")]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Operation>,
}

#[derive(Debug, Subcommand)]
enum Operation {
    /// Full dump (schema and data) in custom format
    Backup,
    /// Data-only dump as gzipped SQL
    BackupData,
    /// Restore a local file or s3:// object, or the newest staged backup
    Restore { path: Option<String> },
    /// Restore, then start DEV_COMMAND
    RestoreAndDev { path: Option<String> },
}

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help, version, and unknown verbs all end here.
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };
    init_tracing(cli.verbose);

    let Some(operation) = cli.command else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    let config = match AppConfig::from_env(&process_env()) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            return ExitCode::from(2);
        }
    };
    let remote = RetentionManager::from_config(config.s3.as_ref()).await;

    let report = match operation {
        Operation::Backup => backup::run_backup_flow(&config, BackupMode::Full, &remote).await,
        Operation::BackupData => {
            backup::run_backup_flow(&config, BackupMode::DataOnly, &remote).await
        }
        Operation::Restore { path } => {
            restore::run_restore_flow(&config, path.as_deref(), &remote).await
        }
        Operation::RestoreAndDev { path } => {
            restore::run_restore_and_dev(&config, path.as_deref(), &remote).await
        }
    };
    report.exit_code()
}

/// The process environment, minus entries that are not valid UTF-8.
fn process_env() -> EnvSource {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("info"),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
