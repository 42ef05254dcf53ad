//! Process settings.
//!
//! Settings come from command-line flags with environment fallbacks and are
//! checked once with [`ProcessorSettings::validate`] before anything starts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use hush_pipeline::{OnError, PipelineConfig, ProcessorConfig};

use crate::error::{DaemonError, Result};

/// Upper bound on the worker pool.
pub const MAX_WORKERS: usize = 256;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(DaemonError::Config(format!(
                "unknown log format '{other}', expected 'text' or 'json'"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Where alerts are read from or written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Standard input or output.
    Stdio,
    /// A file.
    File(PathBuf),
}

impl FromStr for Endpoint {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" => Err(DaemonError::Config("path cannot be empty".to_string())),
            "-" => Ok(Self::Stdio),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "-"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Settings of the `run` command.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// The pipeline rule document.
    pub pipeline_file: PathBuf,
    /// JSON-lines alert input.
    pub input: Endpoint,
    /// JSON-lines output of processed alerts.
    pub output: Endpoint,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Overrides the rate limit's `on_error` policy.
    pub ratelimit_on_error: Option<OnError>,
    /// Redis URL of the shared counter store.
    pub redis_url: Option<String>,
    /// Attempts before a failing delivery is rejected.
    pub max_attempts: u32,
    /// Bytes of malformed payloads to log.
    pub excerpt_bytes: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        let processor = ProcessorConfig::default();
        Self {
            pipeline_file: PathBuf::from("/etc/hush/pipeline.yaml"),
            input: Endpoint::Stdio,
            output: Endpoint::Stdio,
            workers: 4,
            ratelimit_on_error: None,
            redis_url: None,
            max_attempts: processor.max_attempts,
            excerpt_bytes: processor.excerpt_bytes,
        }
    }
}

impl ProcessorSettings {
    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline_file.as_os_str().is_empty() {
            return Err(DaemonError::Config("pipeline file cannot be empty".to_string()));
        }

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(DaemonError::Config(format!(
                "workers must be between 1 and {MAX_WORKERS}"
            )));
        }

        if self.max_attempts == 0 {
            return Err(DaemonError::Config(
                "max attempts must be at least 1".to_string(),
            ));
        }

        if let Some(url) = &self.redis_url {
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err(DaemonError::Config(format!(
                    "redis url '{url}' must start with redis:// or rediss://"
                )));
            }
            if !cfg!(feature = "redis") {
                return Err(DaemonError::Config(
                    "a redis url was given but hushd was built without the redis feature"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Orchestrator settings derived from these settings.
    #[must_use]
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_attempts: self.max_attempts,
            excerpt_bytes: self.excerpt_bytes,
        }
    }

    /// Applies overrides to a loaded pipeline document.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let (Some(policy), Some(rate_limit)) = (self.ratelimit_on_error, config.rate_limit.as_mut()) {
            rate_limit.on_error = policy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hush_pipeline::RateLimitConfig;

    mod parse_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("text", LogFormat::Text; "text")]
        #[test_case("JSON", LogFormat::Json; "upper json")]
        #[test_case(" json ", LogFormat::Json; "padded")]
        fn log_format(input: &str, expected: LogFormat) {
            assert_eq!(input.parse::<LogFormat>().unwrap(), expected);
        }

        #[test]
        fn unknown_log_format() {
            assert!("yaml".parse::<LogFormat>().is_err());
        }

        #[test]
        fn endpoints() {
            assert_eq!("-".parse::<Endpoint>().unwrap(), Endpoint::Stdio);
            assert_eq!(
                "alerts.jsonl".parse::<Endpoint>().unwrap(),
                Endpoint::File(PathBuf::from("alerts.jsonl"))
            );
            assert!("  ".parse::<Endpoint>().is_err());
            assert_eq!(Endpoint::Stdio.to_string(), "-");
        }
    }

    mod validate_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn defaults_are_valid() {
            ProcessorSettings::default().validate().unwrap();
        }

        #[test_case(0; "zero")]
        #[test_case(MAX_WORKERS + 1; "too many")]
        fn bad_worker_count(workers: usize) {
            let settings = ProcessorSettings {
                workers,
                ..ProcessorSettings::default()
            };
            assert!(settings.validate().is_err());
        }

        #[test]
        fn zero_attempts() {
            let settings = ProcessorSettings {
                max_attempts: 0,
                ..ProcessorSettings::default()
            };
            assert!(settings.validate().is_err());
        }

        #[test]
        fn redis_url_scheme() {
            let settings = ProcessorSettings {
                redis_url: Some("http://localhost:6379".to_string()),
                ..ProcessorSettings::default()
            };
            let err = settings.validate().unwrap_err();
            assert!(err.to_string().contains("must start with redis://"));
        }
    }

    #[test]
    fn on_error_override_applies_to_rate_limit() {
        let mut config = PipelineConfig {
            rate_limit: Some(RateLimitConfig {
                condition: String::new(),
                burst: 10,
                period_secs: 60,
                on_error: OnError::Fail,
            }),
            ..PipelineConfig::default()
        };
        let settings = ProcessorSettings {
            ratelimit_on_error: Some(OnError::Allow),
            ..ProcessorSettings::default()
        };
        settings.apply_overrides(&mut config);
        assert_eq!(config.rate_limit.unwrap().on_error, OnError::Allow);

        let mut without = PipelineConfig::default();
        settings.apply_overrides(&mut without);
        assert!(without.rate_limit.is_none());
    }

    #[test]
    fn processor_config_mirrors_settings() {
        let settings = ProcessorSettings {
            max_attempts: 9,
            excerpt_bytes: 64,
            ..ProcessorSettings::default()
        };
        let config = settings.processor_config();
        assert_eq!(config.max_attempts, 9);
        assert_eq!(config.excerpt_bytes, 64);
    }
}
