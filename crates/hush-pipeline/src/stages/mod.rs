//! Compiled pipeline stages.
//!
//! Every stage is built once from its configuration section and then shared
//! read-only by all workers. A stage mutates the alert in hand and tells the
//! caller whether the remaining stages should run.

use std::fmt;

use hush_core::{Alert, Condition};

use crate::config::rule_label;
use crate::error::{PipelineError, Result};

pub mod grouping;
pub mod notification;
pub mod ratelimit;
pub mod silence;
pub mod transform;

pub use grouping::{GroupingStage, group_hash};
pub use notification::NotificationStage;
pub use ratelimit::RateLimitStage;
pub use silence::SilenceStage;
pub use transform::TransformStage;

/// Whether processing continues after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next stage.
    Continue,
    /// Skip the remaining stages.
    Stop,
}

/// A rule's compiled `if`. An empty condition matches every alert.
#[derive(Debug, Clone, Default)]
pub struct RuleCondition(Option<Condition>);

impl RuleCondition {
    /// Compiles the `if` text of a rule.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRule`] naming the stage and the rule.
    pub fn compile(stage: &'static str, name: Option<&str>, index: usize, text: &str) -> Result<Self> {
        Self::compile_as(stage, || rule_label(name, index), text)
    }

    /// Like [`compile`](Self::compile), with the error label built by `label`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRule`] naming the stage and the rule.
    pub fn compile_as(stage: &'static str, label: impl FnOnce() -> String, text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self(None));
        }
        Condition::parse(text)
            .map(|c| Self(Some(c)))
            .map_err(|source| PipelineError::InvalidRule {
                stage,
                rule: label(),
                source,
            })
    }

    /// Returns true if the alert satisfies the condition.
    #[must_use]
    pub fn test(&self, alert: &Alert) -> bool {
        self.0.as_ref().is_none_or(|c| c.test(alert))
    }

    /// Returns the compiled condition, `None` for "always".
    #[must_use]
    pub const fn condition(&self) -> Option<&Condition> {
        self.0.as_ref()
    }
}

impl fmt::Display for RuleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(c) => write!(f, "{c}"),
            None => write!(f, "always"),
        }
    }
}
