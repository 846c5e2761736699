// pgvault/src/utils/process.rs
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::errors::{AppError, Result};

/// Runs `cmd` to completion with stdout and stderr captured. A child that
/// outlives `limit` is killed and reported as [`AppError::Timeout`].
pub async fn output_with_timeout(
    cmd: &mut Command,
    program: &str,
    limit: Duration,
) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Spawning {} (timeout {}s)", program, limit.as_secs());
    let child = cmd.spawn()?;

    // Dropping the pending future drops the child, and kill_on_drop reaps it.
    match timeout(limit, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(AppError::Timeout {
            program: program.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

/// Exit status plus whatever diagnostics the tool printed.
pub fn describe_failure(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        format!("{}\nStdout: {}", output.status, stdout.trim())
    } else {
        format!("{}\nStderr: {}", output.status, stderr)
    }
}
