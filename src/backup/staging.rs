// pgvault/src/backup/staging.rs
use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

static ARTIFACT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(sql|dump)(\.gz)?$").expect("static regex"));

#[derive(Debug, Clone)]
pub struct StagedArtifact {
    pub path: PathBuf,
    pub name: String,
    pub modified: SystemTime,
}

pub fn is_artifact_name(name: &str) -> bool {
    ARTIFACT_NAME.is_match(name)
}

/// Creates the staging directory and its parents. Succeeds if it already exists.
pub fn ensure_directory(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Backup files in `dir`, newest first. A missing directory yields an empty list.
pub fn list_artifacts(dir: &Path) -> io::Result<Vec<StagedArtifact>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut artifacts = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_artifact_name(&name) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        artifacts.push(StagedArtifact {
            path: entry.path(),
            name,
            modified: metadata.modified()?,
        });
    }

    // Names embed the timestamp, so they break mtime ties in the same direction.
    artifacts.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    Ok(artifacts)
}

pub fn latest(dir: &Path) -> io::Result<Option<PathBuf>> {
    Ok(list_artifacts(dir)?.into_iter().next().map(|a| a.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, modified: SystemTime) -> io::Result<()> {
        let file = File::create(path)?;
        file.set_modified(modified)
    }

    #[test]
    fn test_naming_convention_filter() {
        assert!(is_artifact_name("shop-full-2024-05-01T12-30-45-123Z.dump"));
        assert!(is_artifact_name("shop-data-only-2024-05-01T12-30-45-123Z.sql.gz"));
        assert!(is_artifact_name("legacy.sql"));
        assert!(is_artifact_name("legacy.dump.gz"));
        assert!(!is_artifact_name("notes.txt"));
        assert!(!is_artifact_name("shop.sql.bak"));
        assert!(!is_artifact_name("shop.gz"));
    }

    #[test]
    fn test_latest_on_empty_directory_is_none() -> anyhow::Result<()> {
        let dir = tempdir()?;
        assert_eq!(latest(dir.path())?, None);
        assert!(list_artifacts(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_latest_on_missing_directory_is_none() -> anyhow::Result<()> {
        let dir = tempdir()?;
        assert_eq!(latest(&dir.path().join("never-created"))?, None);
        Ok(())
    }

    #[test]
    fn test_latest_returns_newest() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let now = SystemTime::now();
        touch(&dir.path().join("a.sql"), now - Duration::from_secs(3600))?;
        touch(&dir.path().join("b.sql"), now)?;

        assert_eq!(latest(dir.path())?, Some(dir.path().join("b.sql")));
        Ok(())
    }

    #[test]
    fn test_listing_skips_foreign_entries_and_orders_newest_first() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let now = SystemTime::now();
        touch(&dir.path().join("old.dump"), now - Duration::from_secs(300))?;
        touch(&dir.path().join("mid.sql.gz"), now - Duration::from_secs(200))?;
        touch(&dir.path().join("new.dump"), now - Duration::from_secs(100))?;
        touch(&dir.path().join("newest-but-ignored.txt"), now)?;
        fs::create_dir(dir.path().join("folder.dump"))?;

        let names: Vec<String> = list_artifacts(dir.path())?
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["new.dump", "mid.sql.gz", "old.dump"]);
        Ok(())
    }

    #[test]
    fn test_ensure_directory_is_idempotent() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let nested = dir.path().join("a").join("b");
        ensure_directory(&nested)?;
        ensure_directory(&nested)?;
        assert!(nested.is_dir());
        Ok(())
    }
}
