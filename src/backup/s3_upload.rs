// pgvault/src/backup/s3_upload.rs
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::{Credentials, Region};
use s3::primitives::ByteStream;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::S3Config;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The handful of bucket operations backups need.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put_file(&self, key: &str, path: &Path) -> anyhow::Result<()>;

    /// Every object in the bucket, in provider order.
    async fn list_objects(&self) -> anyhow::Result<Vec<RemoteObject>>;

    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;

    async fn download(&self, key: &str, dest: &Path) -> anyhow::Result<u64>;
}

pub struct S3Store {
    client: s3::Client,
    bucket: String,
}

impl S3Store {
    pub async fn connect(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id, secret, None, // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        }
        let sdk_config = loader.load().await;

        // MinIO and most self-hosted endpoints only speak path-style.
        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();

        S3Store {
            client: s3::Client::from_conf(s3_config),
            bucket: config.bucket_name.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_file(&self, key: &str, path: &Path) -> anyhow::Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("Failed to create ByteStream from file: {}", path.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| anyhow!("{}", s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn list_objects(&self) -> anyhow::Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let resp = request
                .send()
                .await
                .map_err(|e| anyhow!("{}", s3::error::DisplayErrorContext(e)))?;

            for object in resp.contents() {
                if let Some(key) = object.key() {
                    objects.push(RemoteObject {
                        key: key.to_string(),
                        last_modified: object
                            .last_modified()
                            .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                    });
                }
            }

            match (resp.is_truncated(), resp.next_continuation_token()) {
                (Some(true), Some(token)) => continuation_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!("Listed {} objects in bucket {}", objects.len(), self.bucket);
        Ok(objects)
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("{}", s3::error::DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn download(&self, key: &str, dest: &Path) -> anyhow::Result<u64> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!("{}", s3::error::DisplayErrorContext(e)))?;

        let mut body = object.body.into_async_read();
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create destination file: {}", dest.display()))?;
        let copied = tokio::io::copy(&mut body, &mut file)
            .await
            .with_context(|| format!("Failed to write downloaded file: {}", dest.display()))?;
        file.sync_all().await?;
        Ok(copied)
    }
}

#[derive(Debug)]
pub enum UploadOutcome {
    /// No bucket configured; the local file stays where it is.
    Disabled,
    /// The object is in the bucket. `local_cleanup` holds the error if the
    /// local copy could not be removed afterwards.
    Uploaded {
        bucket: String,
        key: String,
        local_cleanup: Option<AppError>,
    },
}

#[derive(Debug, Default)]
pub struct PruneReport {
    pub listed: usize,
    pub deleted: Vec<String>,
    pub failed: Vec<AppError>,
}

/// Uploads finished artifacts and keeps the bucket bounded.
#[derive(Clone)]
pub struct RetentionManager {
    store: Option<Arc<dyn ObjectStore>>,
}

impl RetentionManager {
    pub fn disabled() -> Self {
        RetentionManager { store: None }
    }

    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        RetentionManager { store: Some(store) }
    }

    pub async fn from_config(config: Option<&S3Config>) -> Self {
        match config {
            Some(s3_config) => {
                info!(
                    "Remote storage enabled: bucket {} ({})",
                    s3_config.bucket_name,
                    s3_config.endpoint_url.as_deref().unwrap_or("AWS")
                );
                Self::new(Arc::new(S3Store::connect(s3_config).await))
            }
            None => {
                info!("S3_BUCKET not set; remote upload and pruning are disabled");
                Self::disabled()
            }
        }
    }

    pub fn store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.store.as_ref()
    }

    /// Puts `local_path` in the bucket under its file name, then deletes the
    /// local copy. The local file is only touched after the put succeeded.
    pub async fn upload(&self, local_path: &Path) -> Result<UploadOutcome> {
        let Some(store) = &self.store else {
            return Ok(UploadOutcome::Disabled);
        };

        let key = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::RemoteUpload {
                path: local_path.to_path_buf(),
                detail: "file name is not valid UTF-8".to_string(),
            })?
            .to_string();

        info!(
            "Uploading {} to bucket {} as {}",
            local_path.display(),
            store.bucket(),
            key
        );
        store
            .put_file(&key, local_path)
            .await
            .map_err(|e| AppError::RemoteUpload {
                path: local_path.to_path_buf(),
                detail: format!("{:#}", e),
            })?;
        info!("✅ Uploaded {} to bucket {}", key, store.bucket());

        let local_cleanup = match tokio::fs::remove_file(local_path).await {
            Ok(()) => {
                debug!("Removed local copy {}", local_path.display());
                None
            }
            Err(e) => {
                warn!(
                    "Uploaded {} but could not remove local copy {}: {}",
                    key,
                    local_path.display(),
                    e
                );
                Some(AppError::Io(e))
            }
        };

        Ok(UploadOutcome::Uploaded {
            bucket: store.bucket().to_string(),
            key,
            local_cleanup,
        })
    }

    /// Deletes every object past the `keep` most recent, bucket-wide.
    pub async fn prune(&self, keep: usize) -> Result<PruneReport> {
        let Some(store) = &self.store else {
            return Ok(PruneReport::default());
        };

        let objects = store
            .list_objects()
            .await
            .map_err(|e| AppError::RemoteList {
                bucket: store.bucket().to_string(),
                detail: format!("{:#}", e),
            })?;
        let mut report = PruneReport {
            listed: objects.len(),
            ..PruneReport::default()
        };

        let expired = select_expired(objects, keep);
        if expired.is_empty() {
            debug!(
                "{} objects in bucket {}, retention {}: nothing to prune",
                report.listed,
                store.bucket(),
                keep
            );
            return Ok(report);
        }

        info!(
            "Pruning {} of {} objects in bucket {} (keeping {})",
            expired.len(),
            report.listed,
            store.bucket(),
            keep
        );
        for object in expired {
            match store.delete_object(&object.key).await {
                Ok(()) => {
                    info!("Deleted old backup {}", object.key);
                    report.deleted.push(object.key);
                }
                Err(e) => {
                    let err = AppError::RemoteDelete {
                        key: object.key,
                        detail: format!("{:#}", e),
                    };
                    warn!("{}", err);
                    report.failed.push(err);
                }
            }
        }
        Ok(report)
    }
}

/// Objects beyond the `keep` most recent. The sort is stable, so equal
/// timestamps keep the provider's order; objects without one count as oldest.
pub fn select_expired(mut objects: Vec<RemoteObject>, keep: usize) -> Vec<RemoteObject> {
    if objects.len() <= keep {
        return Vec::new();
    }
    objects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    objects.split_off(keep)
}
