// pgvault/src/restore/s3_download.rs
use std::path::{Path, PathBuf};
use tracing::info;

use crate::backup::RetentionManager;
use crate::backup::staging::ensure_directory;
use crate::errors::{AppError, Result};

/// Parses an S3 URI (s3://bucket/key) into bucket and key.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, String)> {
    let uri = url::Url::parse(s3_uri)
        .map_err(|e| AppError::config(format!("Invalid S3 URI {}: {}", s3_uri, e)))?;
    if uri.scheme() != "s3" {
        return Err(AppError::config("S3 URI must start with s3://"));
    }
    let bucket = uri
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AppError::config(format!("S3 URI missing bucket name: {}", s3_uri)))?
        .to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(AppError::config(format!(
            "S3 URI missing key (object path): {}",
            s3_uri
        )));
    }
    Ok((bucket, key))
}

pub fn is_s3_uri(target: &str) -> bool {
    target.starts_with("s3://")
}

/// Fetches `s3_uri` into the staging directory and returns the local path.
/// The file keeps the key's final segment as its name, so the restore
/// pipeline sees the usual extension.
pub async fn download_artifact(
    remote: &RetentionManager,
    s3_uri: &str,
    staging_dir: &Path,
) -> Result<PathBuf> {
    let (bucket, key) = parse_s3_uri(s3_uri)?;

    let Some(store) = remote.store() else {
        return Err(AppError::RemoteDownload {
            key,
            detail: "S3_BUCKET is not configured".to_string(),
        });
    };
    if store.bucket() != bucket {
        return Err(AppError::RemoteDownload {
            key,
            detail: format!(
                "bucket {} does not match configured bucket {}",
                bucket,
                store.bucket()
            ),
        });
    }

    let file_name = Path::new(&key)
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| AppError::RemoteDownload {
            key: key.clone(),
            detail: "key has no file name".to_string(),
        })?;
    ensure_directory(staging_dir)?;
    let destination = staging_dir.join(file_name);

    info!(
        "Downloading s3://{}/{} to {}",
        bucket,
        key,
        destination.display()
    );
    let bytes = store
        .download(&key, &destination)
        .await
        .map_err(|e| AppError::RemoteDownload {
            key: key.clone(),
            detail: format!("{:#}", e),
        })?;
    info!(
        "✅ Downloaded {} bytes to {}",
        bytes,
        destination.display()
    );
    Ok(destination)
}
