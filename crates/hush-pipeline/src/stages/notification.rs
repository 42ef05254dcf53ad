//! Notification stage: routes alerts to destinations and publishes them.
//!
//! Unlike the other stages every matching rule contributes. Destinations
//! accumulate in rule order without duplicates until a `terminal` rule
//! matches. Alerts no rule matches go to the default channels.

use hush_core::Alert;
use tracing::{debug, warn};

use super::RuleCondition;
use crate::config::{Destination, NotificationRuleConfig, rule_label};
use crate::error::{PipelineError, Result};
use crate::notify::{NotificationPublisher, publish_all};

const STAGE: &str = "notification";

/// A compiled notification rule.
#[derive(Debug, Clone)]
pub struct NotificationRule {
    label: String,
    condition: RuleCondition,
    channels: Vec<Destination>,
    terminal: bool,
}

impl NotificationRule {
    /// Returns true if later rules are skipped once this one matches.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.terminal
    }
}

/// The compiled notification stage.
#[derive(Debug, Clone, Default)]
pub struct NotificationStage {
    rules: Vec<NotificationRule>,
    defaults: Vec<Destination>,
}

impl NotificationStage {
    /// Compiles the notification rules.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRule`] for a bad condition.
    pub fn compile(configs: &[NotificationRuleConfig], defaults: &[Destination]) -> Result<Self> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(i, c)| -> Result<NotificationRule> {
                Ok(NotificationRule {
                    label: rule_label(c.name.as_deref(), i),
                    condition: RuleCondition::compile(STAGE, c.name.as_deref(), i, &c.condition)?,
                    channels: c.channels.clone(),
                    terminal: c.terminal,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            defaults: defaults.to_vec(),
        })
    }

    /// The compiled rules.
    #[must_use]
    pub fn rules(&self) -> &[NotificationRule] {
        &self.rules
    }

    /// Destinations used when no rule matches.
    #[must_use]
    pub fn defaults(&self) -> &[Destination] {
        &self.defaults
    }

    /// Returns the destinations for `alert`, in rule order, deduplicated.
    #[must_use]
    pub fn route(&self, alert: &Alert) -> Vec<Destination> {
        let mut routed: Vec<Destination> = Vec::new();
        let mut matched = false;
        for rule in &self.rules {
            if !rule.condition.test(alert) {
                continue;
            }
            debug!(alert_id = %alert.id, stage = STAGE, rule = %rule.label, condition = %rule.condition, "rule matched");
            matched = true;
            for channel in &rule.channels {
                if !routed.contains(channel) {
                    routed.push(channel.clone());
                }
            }
            if rule.terminal {
                break;
            }
        }
        if matched { routed } else { self.defaults.clone() }
    }

    /// Routes the alert, records the destinations on it and publishes.
    ///
    /// Muted and rate-limited alerts are skipped. Returns the number of
    /// delivered notifications.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Notification`] if every destination failed.
    /// Partial failures are logged and the alert counts as processed.
    pub async fn process<P: NotificationPublisher>(&self, alert: &mut Alert, publisher: &P) -> Result<usize> {
        if alert.skips_notification() {
            debug!(alert_id = %alert.id, muted = alert.mute.enabled, limited = alert.rate_limit.limited, "notification skipped");
            return Ok(0);
        }
        let destinations = self.route(alert);
        alert.notifications = destinations.iter().map(ToString::to_string).collect();
        match publish_all(publisher, alert, &destinations).await {
            Ok(sent) => Ok(sent),
            Err(errors) if errors.all_failed() => Err(PipelineError::Notification(errors)),
            Err(errors) => {
                warn!(alert_id = %alert.id, error = %errors, "some notifications failed");
                Ok(errors.attempted - errors.failures.len())
            }
        }
    }
}
