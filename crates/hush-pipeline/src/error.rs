//! Error types for the hush-pipeline crate.

use std::fmt;

use hush_core::CoreError;
use thiserror::Error;

/// How the orchestrator reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad operator configuration. Fatal at startup.
    Config,
    /// Undecodable input. Rejected without redelivery.
    Malformed,
    /// Transient failure. The message is requeued.
    Recoverable,
    /// The alert can never be processed. Rejected without redelivery.
    Rejected,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Malformed => write!(f, "malformed"),
            Self::Recoverable => write!(f, "recoverable"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// One failed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFailure {
    /// The destination, rendered as `kind/name`.
    pub destination: String,
    /// Why publishing failed.
    pub reason: String,
}

/// Every notification failure of one alert.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct NotificationErrors {
    /// Number of notifications attempted.
    pub attempted: usize,
    /// The failed ones.
    pub failures: Vec<NotificationFailure>,
}

impl NotificationErrors {
    /// Returns true if no notification was delivered.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.failures.len() >= self.attempted
    }
}

impl fmt::Display for NotificationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} notifications failed:",
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, "\n\t* {}: {}", failure.destination, failure.reason)?;
        }
        Ok(())
    }
}

/// Errors that can occur while compiling or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A rule failed to compile.
    #[error("invalid {stage} rule '{rule}': {source}")]
    InvalidRule {
        /// The stage the rule belongs to.
        stage: &'static str,
        /// The rule name, or its position when unnamed.
        rule: String,
        /// The underlying error.
        #[source]
        source: CoreError,
    },

    /// The pipeline configuration is invalid.
    #[error("invalid configuration: {reason}")]
    Config {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// A configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration document could not be parsed.
    #[error("failed to parse pipeline document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A queue message could not be decoded into an alert.
    #[error("malformed alert payload: {reason}")]
    Malformed {
        /// The decode error.
        reason: String,
    },

    /// The alert content cannot be processed, no matter how often it is retried.
    #[error("rejected alert: {reason}")]
    Rejected {
        /// Why the alert was rejected.
        reason: String,
    },

    /// The rate-limit counter store failed.
    #[error("counter store error: {reason}")]
    CounterStore {
        /// The underlying failure.
        reason: String,
    },

    /// Publishing one notification failed.
    #[error("failed to publish to {destination}: {reason}")]
    Publish {
        /// The destination, rendered as `kind/name`.
        destination: String,
        /// The underlying failure.
        reason: String,
    },

    /// Notifications failed.
    #[error(transparent)]
    Notification(#[from] NotificationErrors),

    /// Persisting the alert failed.
    #[error("store error: {reason}")]
    Store {
        /// The underlying failure.
        reason: String,
    },

    /// The queue failed.
    #[error("queue error: {reason}")]
    Queue {
        /// The underlying failure.
        reason: String,
    },
}

impl PipelineError {
    /// Classifies the error for the orchestrator.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidRule { .. } | Self::Config { .. } | Self::Io { .. } | Self::Yaml(_) => {
                ErrorClass::Config
            }
            Self::Malformed { .. } => ErrorClass::Malformed,
            Self::Rejected { .. } => ErrorClass::Rejected,
            Self::CounterStore { .. }
            | Self::Publish { .. }
            | Self::Notification(_)
            | Self::Store { .. }
            | Self::Queue { .. } => ErrorClass::Recoverable,
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
