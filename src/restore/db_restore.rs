// pgvault/src/restore/db_restore.rs
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::backup::compression::gunzip_file;
use crate::config::ConnectionDescriptor;
use crate::errors::{AppError, Result};
use crate::utils::process::{describe_failure, output_with_timeout};
use crate::utils::{apply_connection, find_executable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// pg_dump custom format, restored with pg_restore.
    Custom,
    /// Plain SQL, fed to psql.
    PlainSql,
}

impl ArtifactFormat {
    pub fn detect(path: &Path) -> Self {
        if has_suffix(path, ".dump") {
            ArtifactFormat::Custom
        } else {
            ArtifactFormat::PlainSql
        }
    }

    fn program(self) -> &'static str {
        match self {
            ArtifactFormat::Custom => "pg_restore",
            ArtifactFormat::PlainSql => "psql",
        }
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(suffix))
        .unwrap_or(false)
}

/// `x.sql.gz` -> `x.sql`, next to the original. This is the name the format
/// is detected from; the bytes go to [`scratch_path`].
pub fn decompressed_path(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stripped = name.strip_suffix(".gz")?;
    if stripped.is_empty() {
        return None;
    }
    Some(path.with_file_name(stripped))
}

/// `x.sql` -> `x.sql.<pid>.restoring`. Unique to this process and outside
/// the staging naming convention, so an existing `x.sql` is never touched.
pub fn scratch_path(decompressed: &Path) -> PathBuf {
    let mut name = decompressed
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.restoring", std::process::id()));
    decompressed.with_file_name(name)
}

/// A file this run created and must not leave behind.
struct ScratchFile(PathBuf);

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed intermediate {}", self.0.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove intermediate {}: {}", self.0.display(), e),
        }
    }
}

/// Restores `artifact` into the configured database.
///
/// Gzipped artifacts are unpacked into a scratch file next to the original
/// first, since both restore tools read the file by path. Only that scratch
/// file is removed afterwards, whatever the outcome.
pub async fn restore(conn: &ConnectionDescriptor, artifact: &Path, limit: Duration) -> Result<()> {
    if !artifact.is_file() {
        return Err(AppError::restore(
            "locating artifact",
            format!("{} does not exist or is not a file", artifact.display()),
        ));
    }

    let decompressed = decompressed_path(artifact);
    let format = ArtifactFormat::detect(decompressed.as_deref().unwrap_or(artifact));

    let scratch = match decompressed {
        Some(name) => {
            let target = scratch_path(&name);
            if target.exists() {
                return Err(AppError::restore(
                    "decompressing artifact",
                    format!("{} already exists", target.display()),
                ));
            }
            // Armed before decompressing so a half-written file goes too.
            let guard = ScratchFile(target);
            decompress(artifact, &guard.0).await?;
            Some(guard)
        }
        None => None,
    };
    let plain = scratch
        .as_ref()
        .map_or(artifact, |ScratchFile(target)| target.as_path());

    let program = format.program();
    let executable = find_executable(program)
        .map_err(|e| AppError::restore(format!("locating {}", program), format!("{:#}", e)))?;

    info!(
        "🔄 Restoring {} into {}@{}:{}/{} with {}",
        plain.display(),
        conn.username,
        conn.host,
        conn.port,
        conn.database,
        program
    );
    let mut cmd = restore_command(&executable, conn, format, plain);
    let output = match output_with_timeout(&mut cmd, program, limit).await {
        Ok(output) => output,
        Err(AppError::Io(e)) => {
            return Err(AppError::restore(format!("starting {}", program), e.to_string()));
        }
        Err(e) => return Err(e),
    };

    if !output.status.success() {
        return Err(AppError::restore(
            format!("{} on {}", program, plain.display()),
            describe_failure(&output),
        ));
    }

    info!("✓ Restored {} with {}", plain.display(), program);
    Ok(())
}

async fn decompress(source: &Path, target: &Path) -> Result<()> {
    info!("Decompressing {} to {}", source.display(), target.display());
    let (src, dst) = (source.to_path_buf(), target.to_path_buf());
    let bytes = tokio::task::spawn_blocking(move || gunzip_file(&src, &dst))
        .await
        .map_err(|e| AppError::restore("decompressing artifact", e.to_string()))?
        .map_err(|e| {
            AppError::restore(
                format!("decompressing {}", source.display()),
                e.to_string(),
            )
        })?;
    debug!("Decompressed {} bytes", bytes);
    Ok(())
}

pub fn restore_command(
    program: &Path,
    conn: &ConnectionDescriptor,
    format: ArtifactFormat,
    file: &Path,
) -> Command {
    let mut cmd = Command::new(program);
    match format {
        ArtifactFormat::Custom => {
            cmd.arg("--clean")
                .arg("--if-exists")
                .arg("--no-owner")
                .arg("--no-acl")
                .arg("--no-password");
            apply_connection(&mut cmd, conn);
            cmd.arg(file);
        }
        ArtifactFormat::PlainSql => {
            cmd.arg("-X") // Do not read psqlrc
                .arg("-q")
                .arg("-v")
                .arg("ON_ERROR_STOP=1")
                .arg("--no-password");
            apply_connection(&mut cmd, conn);
            cmd.arg("-f").arg(file);
        }
    }
    cmd
}
