// pgvault/src/backup/artifact.rs
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// Schema and data in pg_dump's custom format.
    Full,
    /// Plain SQL rows only, gzip-compressed by us.
    DataOnly,
}

impl BackupMode {
    pub fn suffix(self) -> &'static str {
        match self {
            BackupMode::Full => "full",
            BackupMode::DataOnly => "data-only",
        }
    }

    /// The custom format is already compact and pg_restore needs to seek in
    /// it, so only plain SQL gets gzipped.
    pub fn extension(self) -> &'static str {
        match self {
            BackupMode::Full => "dump",
            BackupMode::DataOnly => "sql.gz",
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// One backup file, named `<database>-<mode>-<timestamp>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub database: String,
    pub mode: BackupMode,
    pub timestamp: String,
    pub local_path: PathBuf,
}

impl BackupArtifact {
    pub fn new(
        database: &str,
        mode: BackupMode,
        staging_dir: &Path,
        created_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = filesystem_timestamp(created_at);
        let file_name = format!(
            "{}-{}-{}.{}",
            database,
            mode.suffix(),
            timestamp,
            mode.extension()
        );
        BackupArtifact {
            database: database.to_string(),
            mode,
            timestamp,
            local_path: staging_dir.join(file_name),
        }
    }

    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// ISO-8601 in UTC with milliseconds, `:` and `.` swapped for `-`.
pub fn filesystem_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}
