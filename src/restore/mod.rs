pub(crate) mod db_restore;
pub(crate) mod s3_download;

use std::path::PathBuf;
use tokio::process::Command;
use tracing::{info, warn};

use crate::backup::RetentionManager;
use crate::backup::staging;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::report::RunReport;

/// Restores `target` (a local path or an `s3://` URI), or the newest
/// artifact in the staging directory when no target is given.
pub async fn run_restore_flow(
    config: &AppConfig,
    target: Option<&str>,
    remote: &RetentionManager,
) -> RunReport {
    let mut report = RunReport::new("restore");

    let artifact = match resolve_artifact(config, target, remote).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            report.fail(AppError::restore(
                "selecting artifact",
                format!("no backups available in {}", config.backup_dir.display()),
            ));
            return report;
        }
        Err(e) => {
            report.fail(e);
            return report;
        }
    };
    report.artifact = Some(artifact.clone());

    if let Err(e) = db_restore::restore(&config.connection, &artifact, config.command_timeout).await
    {
        report.fail(e);
    }
    report
}

async fn resolve_artifact(
    config: &AppConfig,
    target: Option<&str>,
    remote: &RetentionManager,
) -> Result<Option<PathBuf>> {
    match target {
        Some(uri) if s3_download::is_s3_uri(uri) => {
            s3_download::download_artifact(remote, uri, &config.backup_dir)
                .await
                .map(Some)
        }
        Some(path) => Ok(Some(PathBuf::from(path))),
        None => {
            let latest = staging::latest(&config.backup_dir)?;
            if let Some(path) = &latest {
                info!("Latest staged backup: {}", path.display());
            }
            Ok(latest)
        }
    }
}

/// Restores, then hands the terminal to `DEV_COMMAND` until it exits. The
/// dev process starts even when the restore failed; both outcomes count
/// towards the exit code.
pub async fn run_restore_and_dev(
    config: &AppConfig,
    target: Option<&str>,
    remote: &RetentionManager,
) -> RunReport {
    let mut report = RunReport::new("restore-and-dev");
    report.absorb(run_restore_flow(config, target, remote).await);

    if !report.is_success() {
        warn!("⚠️ Restore failed; starting the dev process against the current database state");
    }
    if let Err(e) = run_dev_process(&config.dev_command).await {
        report.fail(e);
    }
    report
}

async fn run_dev_process(command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        return Err(AppError::DevProcess("DEV_COMMAND is empty".to_string()));
    };

    info!("▶️ Starting dev process: {}", command.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .map_err(|e| AppError::DevProcess(format!("could not start {}: {}", program, e)))?;

    if status.success() {
        info!("Dev process exited cleanly");
        Ok(())
    } else {
        Err(AppError::DevProcess(format!("{} exited with {}", program, status)))
    }
}
