// pgvault/src/backup/db_dump.rs
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

use super::artifact::{BackupArtifact, BackupMode};
use super::compression::gzip_into_file;
use crate::config::ConnectionDescriptor;
use crate::errors::{AppError, Result};
use crate::utils::process::{describe_failure, output_with_timeout};
use crate::utils::{apply_connection, find_executable};

/// Dumps the configured database into a new artifact under `staging_dir`.
///
/// Full dumps are written by pg_dump itself (`-f`). Data-only dumps are read
/// from pg_dump's stdout and gzip-compressed on the way to disk.
pub async fn dump(
    conn: &ConnectionDescriptor,
    mode: BackupMode,
    staging_dir: &Path,
    limit: Duration,
) -> Result<BackupArtifact> {
    let artifact = BackupArtifact::new(&conn.database, mode, staging_dir, Utc::now());
    let pg_dump = find_executable("pg_dump")
        .map_err(|e| AppError::dump("locating pg_dump", format!("{:#}", e)))?;
    debug!("Found pg_dump executable at: {}", pg_dump.display());

    info!(
        "Dumping {} ({}) to {}",
        artifact.database,
        artifact.mode,
        artifact.local_path.display()
    );
    let cmd = pg_dump_command(&pg_dump, conn, mode, &artifact.local_path);
    match mode {
        BackupMode::Full => {
            write_with_tool(cmd, &artifact.local_path, "pg_dump", limit).await?;
        }
        BackupMode::DataOnly => {
            let bytes = stream_gzip(cmd, &artifact.local_path, "pg_dump", limit).await?;
            debug!("Compressed {} bytes of SQL", bytes);
        }
    }

    info!(
        "✓ Dump {} taken at {} written to {}",
        artifact.file_name(),
        artifact.timestamp,
        staging_dir.display()
    );
    Ok(artifact)
}

pub fn pg_dump_command(
    program: &Path,
    conn: &ConnectionDescriptor,
    mode: BackupMode,
    dest: &Path,
) -> Command {
    let mut cmd = Command::new(program);
    match mode {
        BackupMode::Full => {
            cmd.arg("--format=custom")
                .arg("--no-owner")
                .arg("--no-acl")
                .arg("--clean")
                .arg("--if-exists");
        }
        BackupMode::DataOnly => {
            cmd.arg("--data-only").arg("--no-owner").arg("--no-acl");
        }
    }
    cmd.arg("--no-password");
    apply_connection(&mut cmd, conn);
    if mode == BackupMode::Full {
        cmd.arg("-f").arg(dest);
    }
    cmd
}

/// Runs a tool that writes `dest` on its own. The exit status is the only
/// success signal; on failure whatever it left at `dest` is removed.
pub async fn write_with_tool(
    mut cmd: Command,
    dest: &Path,
    program: &str,
    limit: Duration,
) -> Result<()> {
    let outcome = output_with_timeout(&mut cmd, program, limit).await;
    let failure = match outcome {
        Ok(output) if output.status.success() => return Ok(()),
        Ok(output) => AppError::dump(
            format!("{} exited with {}", program, output.status),
            describe_failure(&output),
        ),
        Err(AppError::Io(e)) => AppError::dump(format!("starting {}", program), e.to_string()),
        Err(e) => e,
    };

    if tokio::fs::remove_file(dest).await.is_ok() {
        warn!("Removed partial dump {}", dest.display());
    }
    Err(failure)
}

/// Where a streamed dump is written until it is known to be complete. The
/// suffix keeps it out of the staging listing.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Pipes the child's stdout through gzip into `dest`: source, compressor and
/// sink run concurrently and the future resolves once the file is finished.
///
/// Output goes to [`partial_path`] first and is renamed to `dest` only once
/// both the compressor and the child succeeded. On failure the `.partial`
/// file stays behind for inspection.
pub async fn stream_gzip(
    mut cmd: Command,
    dest: &Path,
    program: &str,
    limit: Duration,
) -> Result<u64> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::dump(format!("starting {}", program), e.to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::dump(program, "stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::dump(program, "stderr was not captured"))?;

    let partial = partial_path(dest);
    let source = SyncIoBridge::new(stdout);
    let sink = partial.clone();
    let compress = tokio::task::spawn_blocking(move || gzip_into_file(source, &sink));
    let diagnostics = async move {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).trim().to_string()
    };

    let pipeline = async { tokio::join!(child.wait(), compress, diagnostics) };
    let outcome = timeout(limit, pipeline).await;
    let (status, written, diagnostics) = match outcome {
        Ok(results) => results,
        Err(_) => {
            let _ = child.start_kill();
            warn!("Incomplete file left at {}", partial.display());
            return Err(AppError::Timeout {
                program: program.to_string(),
                secs: limit.as_secs(),
            });
        }
    };

    let written = match written {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            return Err(AppError::dump(
                format!("compressing {} output", program),
                format!("{} (incomplete file left at {})", e, partial.display()),
            ));
        }
        Err(e) => {
            return Err(AppError::dump(
                format!("compressing {} output", program),
                e.to_string(),
            ));
        }
    };

    let status =
        status.map_err(|e| AppError::dump(format!("waiting for {}", program), e.to_string()))?;
    if !status.success() {
        return Err(AppError::dump(
            format!("{} exited with {}", program, status),
            format!(
                "{} (incomplete file left at {})",
                diagnostics,
                partial.display()
            ),
        ));
    }

    tokio::fs::rename(&partial, dest).await.map_err(|e| {
        AppError::dump(
            format!("moving {} into place", partial.display()),
            e.to_string(),
        )
    })?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::compression::gunzip_file;
    use crate::backup::staging;
    use std::ffi::OsStr;
    use std::fs;
    use tempfile::tempdir;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor {
            host: "db.internal".to_string(),
            port: 5433,
            username: "backup".to_string(),
            password: Some("hunter2".to_string()),
            database: "shop".to_string(),
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn env_of<'a>(cmd: &'a Command, key: &str) -> Option<&'a OsStr> {
        cmd.as_std()
            .get_envs()
            .find(|(k, _)| *k == OsStr::new(key))
            .and_then(|(_, v)| v)
    }

    #[test]
    fn test_full_mode_arguments() {
        let dest = PathBuf::from("/staging/shop-full-x.dump");
        let cmd = pg_dump_command(Path::new("pg_dump"), &descriptor(), BackupMode::Full, &dest);
        let args = args_of(&cmd);

        for flag in ["--format=custom", "--no-owner", "--no-acl", "--clean", "--if-exists"] {
            assert!(args.contains(&flag.to_string()), "missing {}", flag);
        }
        assert!(args.windows(2).any(|w| w == ["-f", "/staging/shop-full-x.dump"]));
        assert!(args.windows(2).any(|w| w == ["-d", "shop"]));
        assert!(args.windows(2).any(|w| w == ["-p", "5433"]));
    }

    #[test]
    fn test_data_only_mode_writes_to_stdout() {
        let dest = PathBuf::from("/staging/x.sql.gz");
        let cmd = pg_dump_command(Path::new("pg_dump"), &descriptor(), BackupMode::DataOnly, &dest);
        let args = args_of(&cmd);

        assert!(args.contains(&"--data-only".to_string()));
        assert!(!args.contains(&"--format=custom".to_string()));
        assert!(!args.contains(&"-f".to_string()));
    }

    #[test]
    fn test_password_only_in_environment() {
        for mode in [BackupMode::Full, BackupMode::DataOnly] {
            let cmd = pg_dump_command(Path::new("pg_dump"), &descriptor(), mode, Path::new("/x"));
            assert!(args_of(&cmd).iter().all(|a| !a.contains("hunter2")));
            assert_eq!(env_of(&cmd, "PGPASSWORD"), Some(OsStr::new("hunter2")));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_gzip_captures_stdout() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("out.sql.gz");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'INSERT INTO t VALUES (1);\\nINSERT INTO t VALUES (2);\\n'");

        let written = stream_gzip(cmd, &dest, "sh", Duration::from_secs(10)).await?;
        assert_eq!(written, 52);
        assert!(!partial_path(&dest).exists());

        let plain = dir.path().join("out.sql");
        gunzip_file(&dest, &plain)?;
        assert_eq!(
            fs::read_to_string(&plain)?,
            "INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2);\n"
        );
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_gzip_handles_output_larger_than_pipe_buffer() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("big.sql.gz");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("yes 'INSERT INTO t VALUES (42);' | head -c 5000000");

        let written = stream_gzip(cmd, &dest, "sh", Duration::from_secs(60)).await?;
        assert_eq!(written, 5_000_000);
        assert!(fs::metadata(&dest)?.len() < 5_000_000);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_gzip_surfaces_diagnostics() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("bad.sql.gz");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo 'pg_dump: error: connection refused' >&2; exit 1");

        let err = stream_gzip(cmd, &dest, "sh", Duration::from_secs(10))
            .await
            .unwrap_err();
        match err {
            AppError::DumpProcess { detail, .. } => {
                assert!(detail.contains("connection refused"));
                assert!(detail.contains("incomplete"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_gzip_times_out() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let result = stream_gzip(
            cmd,
            &dir.path().join("hung.sql.gz"),
            "sleep",
            Duration::from_millis(200),
        )
        .await;
        assert!(matches!(result, Err(AppError::Timeout { .. })));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_tool_write_removes_partial_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("shop-full-x.dump");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo partial > \"$1\"; echo 'disk full' >&2; exit 2")
            .arg("sh")
            .arg(&dest);

        let err = write_with_tool(cmd, &dest, "sh", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(!dest.exists());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_tool_write_keeps_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("shop-full-x.dump");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo data > \"$1\"").arg("sh").arg(&dest);

        write_with_tool(cmd, &dest, "sh", Duration::from_secs(10)).await?;
        assert_eq!(fs::read_to_string(&dest)?, "data\n");
        Ok(())
    }

    #[test]
    fn test_partial_path_is_not_an_artifact_name() {
        let partial = partial_path(Path::new("/b/shop-data-only-x.sql.gz"));
        assert_eq!(partial, PathBuf::from("/b/shop-data-only-x.sql.gz.partial"));
        assert!(!staging::is_artifact_name("shop-data-only-x.sql.gz.partial"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_stream_leaves_nothing_for_latest() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("shop-data-only-2024-05-01T12-30-45-123Z.sql.gz");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("printf 'INSERT INTO t VALUES (1);\\n'; exit 1");

        let result = stream_gzip(cmd, &dest, "sh", Duration::from_secs(10)).await;

        assert!(matches!(result, Err(AppError::DumpProcess { .. })));
        assert!(!dest.exists());
        assert!(partial_path(&dest).exists());
        assert_eq!(staging::latest(dir.path())?, None);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timed_out_stream_leaves_nothing_for_latest() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("shop-data-only-x.sql.gz");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'INSERT INTO t VALUES (1);\\n'; exec sleep 30");

        let result = stream_gzip(cmd, &dest, "sh", Duration::from_millis(300)).await;

        assert!(matches!(result, Err(AppError::Timeout { .. })));
        assert!(!dest.exists());
        assert_eq!(staging::latest(dir.path())?, None);
        Ok(())
    }
}
