pub(crate) mod artifact;
pub(crate) mod compression;
pub(crate) mod db_dump;
pub(crate) mod s3_upload;
pub(crate) mod staging;

pub use artifact::BackupMode;
pub use s3_upload::{RetentionManager, UploadOutcome};

use std::path::Path;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::report::RunReport;
use crate::utils::setting::check_db_connection;

/// Dump, upload, prune. Each step's failure is recorded in the report;
/// nothing after a failed dump runs.
pub async fn run_backup_flow(
    config: &AppConfig,
    mode: BackupMode,
    remote: &RetentionManager,
) -> RunReport {
    let mut report = RunReport::new(match mode {
        BackupMode::Full => "backup",
        BackupMode::DataOnly => "backup-data",
    });
    info!(
        "🚀 Starting {} backup of {} into {}",
        mode,
        config.connection.database,
        config.backup_dir.display()
    );

    if let Err(e) = staging::ensure_directory(&config.backup_dir) {
        report.fail(AppError::Io(e));
        return report;
    }

    if !check_db_connection(&config.connection).await {
        warn!("⚠️ Pre-flight connection failed; running pg_dump anyway");
    }

    let artifact = match db_dump::dump(
        &config.connection,
        mode,
        &config.backup_dir,
        config.command_timeout,
    )
    .await
    {
        Ok(artifact) => artifact,
        Err(e) => {
            report.fail(e);
            return report;
        }
    };
    report.artifact = Some(artifact.local_path.clone());

    upload_and_prune(&mut report, remote, &artifact.local_path, config.retention_count).await;
    report
}

/// Prune only runs once the artifact is known to be in the bucket.
async fn upload_and_prune(
    report: &mut RunReport,
    remote: &RetentionManager,
    local_path: &Path,
    keep: usize,
) {
    match remote.upload(local_path).await {
        Ok(UploadOutcome::Disabled) => {
            info!(
                "No remote storage configured; keeping {}",
                local_path.display()
            );
        }
        Ok(UploadOutcome::Uploaded {
            bucket,
            key,
            local_cleanup,
        }) => {
            info!("Remote copy at s3://{}/{}", bucket, key);
            if let Some(e) = local_cleanup {
                report.fail(e);
            }
            prune(report, remote, keep).await;
        }
        Err(e) => {
            report.fail(e);
            warn!(
                "Local artifact kept at {}; skipping prune",
                local_path.display()
            );
        }
    }
}

async fn prune(report: &mut RunReport, remote: &RetentionManager, keep: usize) {
    match remote.prune(keep).await {
        Ok(pruned) => {
            if !pruned.deleted.is_empty() {
                info!(
                    "Pruned {} of {} remote backups",
                    pruned.deleted.len(),
                    pruned.listed
                );
            }
            for failure in pruned.failed {
                report.fail(failure);
            }
        }
        Err(e) => report.fail(e),
    }
}
