//! Error types for hushd.

use thiserror::Error;

/// Errors that can occur while running the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading input or writing output failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An alert could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A condition expression is invalid.
    #[error(transparent)]
    Condition(#[from] hush_core::CoreError),

    /// Pipeline error.
    #[error(transparent)]
    Pipeline(#[from] hush_pipeline::PipelineError),

    /// A worker task failed to complete.
    #[error("worker {worker} failed: {reason}")]
    Worker {
        /// Worker index.
        worker: usize,
        /// Why it failed.
        reason: String,
    },
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;
