//! Silence stage: mutes alerts inside scheduled windows.

use chrono::{DateTime, Utc};
use hush_core::{Alert, Mute, Schedule};
use tracing::debug;

use super::{Flow, RuleCondition};
use crate::config::SilenceRuleConfig;
use crate::error::{PipelineError, Result};

const STAGE: &str = "silence";

/// Component name recorded on alerts muted by this stage.
pub const COMPONENT: &str = "silence";

/// A compiled silence rule.
#[derive(Debug, Clone)]
pub struct SilenceRule {
    name: String,
    condition: RuleCondition,
    schedule: Schedule,
    drop: bool,
}

impl SilenceRule {
    fn compile(config: &SilenceRuleConfig, index: usize) -> Result<Self> {
        let condition =
            RuleCondition::compile(STAGE, config.name.as_deref(), index, &config.condition)?;
        let schedule = Schedule::compile(&config.schedule).map_err(|source| {
            PipelineError::InvalidRule {
                stage: STAGE,
                rule: crate::config::rule_label(config.name.as_deref(), index),
                source,
            }
        })?;
        // Unnamed rules are recorded by their condition text.
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| config.condition.trim().to_string());
        Ok(Self {
            name,
            condition,
            schedule,
            drop: config.drop,
        })
    }

    /// The name recorded on muted alerts.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the rule is active.
    #[must_use]
    pub const fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn applies(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        self.schedule.matches(now) && self.condition.test(alert)
    }
}

/// The compiled silence stage.
#[derive(Debug, Clone, Default)]
pub struct SilenceStage {
    rules: Vec<SilenceRule>,
}

impl SilenceStage {
    /// Compiles the silence rules.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRule`] for a bad condition or schedule.
    pub fn compile(configs: &[SilenceRuleConfig]) -> Result<Self> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(i, c)| SilenceRule::compile(c, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// The compiled rules.
    #[must_use]
    pub fn rules(&self) -> &[SilenceRule] {
        &self.rules
    }

    /// Mutes the alert with the first rule active at `now` that matches.
    /// Returns [`Flow::Stop`] if that rule drops the alert.
    pub fn process(&self, alert: &mut Alert, now: DateTime<Utc>) -> Flow {
        let Some(rule) = self.rules.iter().find(|r| r.applies(alert, now)) else {
            return Flow::Continue;
        };
        debug!(
            alert_id = %alert.id,
            stage = STAGE,
            rule = %rule.name,
            condition = %rule.condition,
            "Silenced by '{}'",
            rule.name
        );
        alert.mute = Mute::by(COMPONENT, rule.name.clone());
        if rule.drop {
            alert.mute.skip_storage = true;
            return Flow::Stop;
        }
        Flow::Continue
    }
}
