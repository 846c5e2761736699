// pgvault/src/report.rs
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use crate::errors::AppError;

/// What one dispatched operation did. Failures are collected instead of
/// aborting so later steps still run; the exit code is derived at the end.
#[derive(Debug)]
pub struct RunReport {
    pub operation: &'static str,
    pub artifact: Option<PathBuf>,
    pub failures: Vec<AppError>,
}

impl RunReport {
    pub fn new(operation: &'static str) -> Self {
        RunReport {
            operation,
            artifact: None,
            failures: Vec::new(),
        }
    }

    pub fn fail(&mut self, err: AppError) {
        error!(operation = self.operation, "❌ {}", err);
        self.failures.push(err);
    }

    pub fn absorb(&mut self, other: RunReport) {
        if self.artifact.is_none() {
            self.artifact = other.artifact;
        }
        self.failures.extend(other.failures);
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            info!("✅ {} completed successfully.", self.operation);
            ExitCode::SUCCESS
        } else {
            error!(
                "{} finished with {} failed step(s)",
                self.operation,
                self.failures.len()
            );
            ExitCode::FAILURE
        }
    }
}
