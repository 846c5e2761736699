pub mod process;
pub mod setting;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::process::Command;
use which::which;

use crate::config::ConnectionDescriptor;

/// Finds a PostgreSQL client executable (`pg_dump`, `pg_restore`, `psql`) in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.",
            name
        )
    })
}

/// Adds `-h/-p/-U/-d` for the target database. The password only ever goes
/// into the child's environment so it stays out of the process list.
pub fn apply_connection(cmd: &mut Command, conn: &ConnectionDescriptor) {
    cmd.arg("-h")
        .arg(&conn.host)
        .arg("-p")
        .arg(conn.port.to_string())
        .arg("-U")
        .arg(&conn.username)
        .arg("-d")
        .arg(&conn.database);
    if let Some(password) = &conn.password {
        cmd.env("PGPASSWORD", password);
    }
}
