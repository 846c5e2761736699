use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dump failed ({context}): {detail}")]
    DumpProcess { context: String, detail: String },

    #[error("Restore failed ({context}): {detail}")]
    RestoreProcess { context: String, detail: String },

    #[error("{program} did not finish within {secs}s and was killed")]
    Timeout { program: String, secs: u64 },

    #[error("Upload of {} failed: {detail}", path.display())]
    RemoteUpload { path: PathBuf, detail: String },

    #[error("Listing bucket {bucket} failed: {detail}")]
    RemoteList { bucket: String, detail: String },

    #[error("Deleting remote object {key} failed: {detail}")]
    RemoteDelete { key: String, detail: String },

    #[error("Downloading remote object {key} failed: {detail}")]
    RemoteDownload { key: String, detail: String },

    #[error("Dev process failed: {0}")]
    DevProcess(String),
}

impl AppError {
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }

    pub fn dump(context: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::DumpProcess {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub fn restore(context: impl Into<String>, detail: impl Into<String>) -> Self {
        AppError::RestoreProcess {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
