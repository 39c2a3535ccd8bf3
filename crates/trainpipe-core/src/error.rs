//! Error types for trainpipe.
//!
//! The first group of variants is the job taxonomy reported to clients of the
//! training stream. The rest are ambient failures that get folded into one of
//! those stages by the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the trainpipe library.
#[derive(Debug, Error)]
pub enum TrainpipeError {
    // Job taxonomy
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Dataset build failed: {message}")]
    DatasetBuild { message: String },

    #[error("Training failed: {message}")]
    Training { message: String },

    #[error("Export failed: {message}")]
    Export { message: String },

    #[error("Training cancelled")]
    Cancelled,

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to link {src} to {dest}: {reason}")]
    LinkFailed {
        src: PathBuf,
        dest: PathBuf,
        reason: String,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    // Lookup errors
    #[error("Base model not found: {name}")]
    BaseModelNotFound { name: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for trainpipe operations.
pub type Result<T> = std::result::Result<T, TrainpipeError>;

impl From<std::io::Error> for TrainpipeError {
    fn from(err: std::io::Error) -> Self {
        TrainpipeError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TrainpipeError {
    fn from(err: serde_json::Error) -> Self {
        TrainpipeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for TrainpipeError {
    fn from(err: rusqlite::Error) -> Self {
        TrainpipeError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for TrainpipeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TrainpipeError::Timeout(std::time::Duration::from_secs(0))
        } else {
            TrainpipeError::Network {
                message: err.to_string(),
                source: Some(err),
            }
        }
    }
}

impl TrainpipeError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        TrainpipeError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an IO error with an action description and path context.
    pub fn io(action: &str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        TrainpipeError::Io {
            message: format!("{action}: {err}"),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        TrainpipeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrainpipeError::Network { .. } | TrainpipeError::Timeout(_)
        )
    }

    /// Whether the error was caused by the caller's input rather than the job.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TrainpipeError::Validation { .. }
                | TrainpipeError::BaseModelNotFound { .. }
                | TrainpipeError::NotFound { .. }
        )
    }

    /// Re-tag an ambient failure as a dataset build failure.
    pub fn into_dataset_error(self) -> Self {
        match self {
            e @ (TrainpipeError::DatasetBuild { .. } | TrainpipeError::Cancelled) => e,
            other => TrainpipeError::DatasetBuild {
                message: other.to_string(),
            },
        }
    }

    /// Re-tag an ambient failure as a training failure.
    pub fn into_training_error(self) -> Self {
        match self {
            e @ (TrainpipeError::Training { .. } | TrainpipeError::Cancelled) => e,
            other => TrainpipeError::Training {
                message: other.to_string(),
            },
        }
    }

    /// Re-tag an ambient failure as an export failure.
    pub fn into_export_error(self) -> Self {
        match self {
            e @ (TrainpipeError::Export { .. } | TrainpipeError::Cancelled) => e,
            other => TrainpipeError::Export {
                message: other.to_string(),
            },
        }
    }
}

/// Attach a path to `std::io::Result` failures.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| TrainpipeError::io_with_path(e, path))
    }
}
