//! The compiled pipeline.
//!
//! [`Pipeline::compile`] turns a [`PipelineConfig`] into the five stages and
//! [`Pipeline::run`] drives one alert through them in fixed order:
//! transform, silence, grouping, rate limit, notification.

use std::fmt;

use chrono::{DateTime, Utc};
use hush_core::Alert;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::notify::NotificationPublisher;
use crate::ratelimit::CounterStore;
use crate::stages::{
    Flow, GroupingStage, NotificationStage, RateLimitStage, SilenceStage, TransformStage,
    transform::TransformRule,
};

/// How far an alert got through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingState {
    /// Decoded from the queue.
    #[default]
    Received,
    /// Transform rules applied.
    Transformed,
    /// Silence rules checked.
    SilenceChecked,
    /// Group hash assigned.
    Grouped,
    /// Rate limit checked.
    RateLimitChecked,
    /// Notifications routed and published.
    Routed,
    /// Persisted and acknowledged.
    Stored,
    /// Dropped by a silence rule and acknowledged without storage.
    Dropped,
    /// Returned to the queue for another attempt.
    Requeued,
    /// Rejected without redelivery.
    Rejected,
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Transformed => "transformed",
            Self::SilenceChecked => "silence_checked",
            Self::Grouped => "grouped",
            Self::RateLimitChecked => "ratelimit_checked",
            Self::Routed => "routed",
            Self::Stored => "stored",
            Self::Dropped => "dropped",
            Self::Requeued => "requeued",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// What one pass through the stages did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// The top-level transform rule that matched.
    pub transform_rule: Option<String>,
    /// The alert was dropped by a silence rule.
    pub dropped: bool,
    /// Notifications delivered.
    pub notified: usize,
}

/// Number of compiled rules per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleCounts {
    /// Transform rules, nested children included.
    pub transform: usize,
    /// Silence rules.
    pub silence: usize,
    /// Grouping rules.
    pub grouping: usize,
    /// Whether the global rate limit is configured.
    pub rate_limit: bool,
    /// Notification rules.
    pub notification: usize,
}

impl fmt::Display for RuleCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transform={} silence={} grouping={} rate_limit={} notification={}",
            self.transform,
            self.silence,
            self.grouping,
            if self.rate_limit { "on" } else { "off" },
            self.notification
        )
    }
}

/// Every stage, compiled and ready to be shared by workers.
#[derive(Debug)]
pub struct Pipeline<C> {
    name: String,
    transform: TransformStage,
    silence: SilenceStage,
    grouping: GroupingStage,
    rate_limit: Option<RateLimitStage<C>>,
    notification: NotificationStage,
}

impl<C: CounterStore> Pipeline<C> {
    /// Validates and compiles `config`, counting rate limits in `store`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or rule compilation error. Callers
    /// are expected to treat it as fatal.
    pub fn compile(config: &PipelineConfig, store: C) -> Result<Self> {
        config.validate()?;
        let pipeline = Self {
            name: config.name.clone(),
            transform: TransformStage::compile(&config.transform_rules)?,
            silence: SilenceStage::compile(&config.silence_rules)?,
            grouping: GroupingStage::compile(&config.grouping_rules, &config.default_group_by)?,
            rate_limit: config
                .rate_limit
                .as_ref()
                .map(|rl| RateLimitStage::compile(rl, store))
                .transpose()?,
            notification: NotificationStage::compile(
                &config.notification_rules,
                &config.default_notification_channels,
            )?,
        };
        debug!(pipeline = %pipeline.name, rules = %pipeline.rule_counts(), "pipeline compiled");
        Ok(pipeline)
    }

    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counts the compiled rules.
    #[must_use]
    pub fn rule_counts(&self) -> RuleCounts {
        RuleCounts {
            transform: self.transform.rules().iter().map(TransformRule::size).sum(),
            silence: self.silence.rules().len(),
            grouping: self.grouping.rules().len(),
            rate_limit: self.rate_limit.is_some(),
            notification: self.notification.rules().len(),
        }
    }

    /// The transform stage.
    #[must_use]
    pub const fn transform(&self) -> &TransformStage {
        &self.transform
    }

    /// The silence stage.
    #[must_use]
    pub const fn silence(&self) -> &SilenceStage {
        &self.silence
    }

    /// The grouping stage.
    #[must_use]
    pub const fn grouping(&self) -> &GroupingStage {
        &self.grouping
    }

    /// The rate-limit stage, if configured.
    #[must_use]
    pub const fn rate_limit(&self) -> Option<&RateLimitStage<C>> {
        self.rate_limit.as_ref()
    }

    /// The notification stage.
    #[must_use]
    pub const fn notification(&self) -> &NotificationStage {
        &self.notification
    }

    /// Runs every stage on `alert`, processed at time `now`.
    ///
    /// Silence schedules are checked against the alert's own timestamp, so a
    /// late or redelivered alert is silenced the way it would have been when
    /// it happened. Rate-limit buckets use `now`.
    ///
    /// `state` advances as stages complete, so on error it names the last
    /// stage that finished.
    ///
    /// # Errors
    ///
    /// Returns the first stage error. Effects of earlier stages stay on the
    /// alert but are not durable until the message is acknowledged.
    pub async fn run<P: NotificationPublisher>(
        &self,
        alert: &mut Alert,
        now: DateTime<Utc>,
        publisher: &P,
        state: &mut ProcessingState,
    ) -> Result<RunOutcome> {
        let mut outcome = RunOutcome {
            transform_rule: self.transform.process(alert)?,
            ..RunOutcome::default()
        };
        *state = ProcessingState::Transformed;

        let event_time = alert.timestamp;
        if self.silence.process(alert, event_time) == Flow::Stop {
            outcome.dropped = true;
            *state = ProcessingState::Dropped;
            return Ok(outcome);
        }
        *state = ProcessingState::SilenceChecked;

        self.grouping.process(alert);
        *state = ProcessingState::Grouped;

        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.process(alert, now).await?;
        }
        *state = ProcessingState::RateLimitChecked;

        outcome.notified = self.notification.process(alert, publisher).await?;
        *state = ProcessingState::Routed;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorClass, PipelineError};
    use crate::notify::MemoryPublisher;
    use crate::ratelimit::MemoryCounterStore;
    use chrono::TimeZone;
    use hush_core::Source;

    const DOC: &str = r"
name: unit
transform_rules:
  - name: normalize
    if: severity_text == 'err'
    actions:
      - { action: set, field: severity_text, value: error }
    children:
      - if: labels[env] == 'prod'
        actions:
          - { action: set, field: 'labels[tier]', value: gold }
silence_rules:
  - name: noisy
    if: labels[process] == 'cron'
    drop: true
  - name: quiet
    if: labels[env] == 'dev'
grouping_rules:
  - name: per-host
    if: has labels[host]
    group_by: ['labels[host]']
rate_limit:
  burst: 1
  period_secs: 60
notification_rules:
  - if: labels[tier] == 'gold'
    channels: [pager/primary]
default_notification_channels: [mail/oncall]
";

    fn pipeline() -> Pipeline<MemoryCounterStore> {
        Pipeline::compile(&PipelineConfig::from_yaml(DOC).unwrap(), MemoryCounterStore::new())
            .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 19, 12, 0, 0).unwrap()
    }

    fn alert() -> Alert {
        Alert::new(Source::new("syslog", "edge-1"))
            .with_severity("err", 17)
            .label("env", "prod")
            .label("host", "h1")
    }

    #[test]
    fn counts_rules() {
        let counts = pipeline().rule_counts();
        assert_eq!(
            counts,
            RuleCounts {
                transform: 2,
                silence: 2,
                grouping: 1,
                rate_limit: true,
                notification: 1,
            }
        );
        assert_eq!(
            counts.to_string(),
            "transform=2 silence=2 grouping=1 rate_limit=on notification=1"
        );
    }

    #[test]
    fn invalid_config_fails_compilation() {
        let mut config = PipelineConfig::from_yaml(DOC).unwrap();
        config.grouping_rules[0].group_by.clear();
        let err = Pipeline::compile(&config, MemoryCounterStore::new()).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Config);
    }

    #[tokio::test]
    async fn runs_every_stage_in_order() {
        let pipeline = pipeline();
        let publisher = MemoryPublisher::new();
        let mut alert = alert();
        let mut state = ProcessingState::Received;
        let outcome = pipeline.run(&mut alert, now(), &publisher, &mut state).await.unwrap();

        assert_eq!(state, ProcessingState::Routed);
        assert_eq!(outcome.transform_rule.as_deref(), Some("normalize"));
        assert_eq!(outcome.notified, 1);
        assert_eq!(alert.severity_text, "error");
        assert_eq!(alert.group_labels.get("labels[host]").map(String::as_str), Some("h1"));
        assert_eq!(alert.rate_limit.count, 1);
        assert_eq!(alert.notifications, vec!["pager/primary"]);
    }

    #[tokio::test]
    async fn second_alert_of_group_is_limited() {
        let pipeline = pipeline();
        let publisher = MemoryPublisher::new();
        let mut state = ProcessingState::Received;
        pipeline.run(&mut alert(), now(), &publisher, &mut state).await.unwrap();

        let mut second = alert();
        let outcome = pipeline.run(&mut second, now(), &publisher, &mut state).await.unwrap();
        assert!(second.rate_limit.limited);
        assert_eq!(outcome.notified, 0);
        assert_eq!(publisher.sent().len(), 1);
    }

    #[tokio::test]
    async fn drop_stops_after_silence() {
        let pipeline = pipeline();
        let publisher = MemoryPublisher::new();
        let mut alert = alert().label("process", "cron");
        let mut state = ProcessingState::Received;
        let outcome = pipeline.run(&mut alert, now(), &publisher, &mut state).await.unwrap();
        assert!(outcome.dropped);
        assert_eq!(state, ProcessingState::Dropped);
        assert!(alert.group_hash.is_empty());
        assert!(publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn failure_reports_last_finished_stage() {
        let pipeline = pipeline();
        let publisher = MemoryPublisher::new();
        publisher.fail_destination("pager/primary");
        let mut state = ProcessingState::Received;
        let err = pipeline.run(&mut alert(), now(), &publisher, &mut state).await.unwrap_err();
        assert!(matches!(err, PipelineError::Notification(_)));
        assert_eq!(state, ProcessingState::RateLimitChecked);
    }

    #[test]
    fn state_display() {
        assert_eq!(ProcessingState::SilenceChecked.to_string(), "silence_checked");
        assert_eq!(ProcessingState::default(), ProcessingState::Received);
    }
}
