//! Error types for the hush-core crate.

use thiserror::Error;

/// Errors raised while validating or compiling core building blocks.
///
/// All of these are configuration errors: they are produced when rules are
/// compiled at startup, never while evaluating an alert.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A field reference names a field outside the allow-list or has a
    /// sub-key mismatch.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The rendered field reference.
        field: String,
        /// Why the field was rejected.
        reason: String,
    },

    /// A value cannot be written into the target field.
    #[error("invalid value '{value}' for field '{field}': {reason}")]
    InvalidValue {
        /// The rendered field reference.
        field: String,
        /// The rejected value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A condition or field expression could not be parsed.
    #[error("parse error at offset {offset} in `{input}`: {reason}")]
    Parse {
        /// The full input text.
        input: String,
        /// Byte offset of the offending token.
        offset: usize,
        /// What went wrong.
        reason: String,
    },

    /// A regular expression in a match condition failed to compile.
    #[error("invalid regular expression '{pattern}': {source}")]
    InvalidRegex {
        /// The pattern as written in the rule.
        pattern: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// A schedule definition is invalid.
    #[error("invalid schedule: {reason}")]
    InvalidSchedule {
        /// The reason the schedule is invalid.
        reason: String,
    },
}

impl CoreError {
    pub(crate) fn parse(input: &str, offset: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.to_string(),
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn schedule(reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            reason: reason.into(),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
