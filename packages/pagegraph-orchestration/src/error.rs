use std::path::PathBuf;

use pagegraph_storage::{ErrorKind, StorageError};
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Top-level errors (startup, enumeration, CLI input)
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid bucket key: {0}")]
    InvalidBucket(String),

    #[error("Detached rebuild failed: {0}")]
    TaskFailed(String),
}

impl OrchestratorError {
    pub fn invalid_bucket<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidBucket(e.to_string())
    }
}

/// Failure of a single bucket job. Never aborts sibling buckets.
#[derive(Error, Debug)]
pub enum RebuildError {
    #[error("Cannot address bucket: {0}")]
    Addressing(String),

    #[error("Gather failed: {0}")]
    Gather(#[from] StorageError),

    #[error("View serialization failed: {0}")]
    View(#[from] serde_json::Error),

    #[error("Render failed for template {template}: {message}")]
    Render { template: String, message: String },

    #[error("Publish failed for {}: {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Rebuild task panicked: {0}")]
    Panicked(String),
}

impl RebuildError {
    pub fn publish(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Publish {
            path: path.into(),
            source,
        }
    }

    /// Whether a `republish` of the same bucket can be expected to succeed
    pub fn category(&self) -> ErrorCategory {
        match self {
            RebuildError::Addressing(_) | RebuildError::View(_) | RebuildError::Render { .. } => {
                ErrorCategory::Permanent
            }
            RebuildError::Gather(e) => match e.kind {
                ErrorKind::Database | ErrorKind::Transaction | ErrorKind::IO => {
                    ErrorCategory::Transient
                }
                _ => ErrorCategory::Permanent,
            },
            RebuildError::Publish { source, .. } => match source.kind() {
                std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::OutOfMemory => {
                    ErrorCategory::Infrastructure
                }
                _ if is_disk_full(source) => ErrorCategory::Infrastructure,
                _ => ErrorCategory::Transient,
            },
            RebuildError::Panicked(_) => ErrorCategory::Infrastructure,
        }
    }
}

// ENOSPC / EDQUOT
fn is_disk_full(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(28) | Some(122))
}

/// Error category for retry logic
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Transient error - retry (e.g., busy database, interrupted write)
    Transient,
    /// Permanent error - don't retry without a data fix (e.g., render error)
    Permanent,
    /// Infrastructure error - alert ops (e.g., disk full, permissions)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
