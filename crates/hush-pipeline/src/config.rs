//! Pipeline configuration documents.
//!
//! A pipeline is described by one YAML document with a section per stage:
//!
//! ```yaml
//! name: default
//! transform_rules:
//!   - name: normalize-severity
//!     if: severity_text == 'err'
//!     actions:
//!       - action: set
//!         field: severity_text
//!         value: error
//! silence_rules:
//!   - name: weekend-dev
//!     if: labels[env] == 'dev'
//!     schedule:
//!       type: weekly
//!       from: { weekday: friday, time: "17:30" }
//!       to: { weekday: monday, time: "08:30" }
//!       timezone: Asia/Tokyo
//! grouping_rules:
//!   - name: per-host
//!     if: has labels[host.name]
//!     group_by: ["labels[host.name]", severity_text]
//! default_group_by: ["labels[service]"]
//! ```
//!
//! Documents are deserialized here and compiled by
//! [`Pipeline::compile`](crate::Pipeline::compile).

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use hush_core::{FieldRef, ScheduleSpec};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PipelineError, Result};

/// The complete rule configuration of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Pipeline name, used in logs.
    pub name: String,
    /// Transform rules, first match wins at the top level.
    pub transform_rules: Vec<TransformRuleConfig>,
    /// Silence rules, first match wins.
    pub silence_rules: Vec<SilenceRuleConfig>,
    /// Grouping rules, first match wins.
    pub grouping_rules: Vec<GroupingRuleConfig>,
    /// Fields to group by when no grouping rule matches.
    pub default_group_by: Vec<FieldRef>,
    /// The global rate limit. Disabled when absent.
    #[serde(alias = "ratelimit", skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Notification rules, all matches accumulate until a terminal rule.
    pub notification_rules: Vec<NotificationRuleConfig>,
    /// Destinations used when no notification rule matches.
    pub default_notification_channels: Vec<Destination>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            transform_rules: Vec::new(),
            silence_rules: Vec::new(),
            grouping_rules: Vec::new(),
            default_group_by: Vec::new(),
            rate_limit: None,
            notification_rules: Vec::new(),
            default_notification_channels: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Loads a pipeline document from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Io`] if the file cannot be read and
    /// [`PipelineError::Yaml`] if it is not a valid document.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a pipeline document from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Yaml`] if the document is invalid.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Checks constraints that the document structure cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::config("pipeline name cannot be empty"));
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        for (i, rule) in self.grouping_rules.iter().enumerate() {
            if rule.group_by.is_empty() {
                return Err(PipelineError::config(format!(
                    "grouping rule '{}' has an empty group_by list",
                    rule_label(rule.name.as_deref(), i)
                )));
            }
        }
        for (i, rule) in self.notification_rules.iter().enumerate() {
            if rule.channels.is_empty() {
                return Err(PipelineError::config(format!(
                    "notification rule '{}' has no channels",
                    rule_label(rule.name.as_deref(), i)
                )));
            }
        }
        Ok(())
    }
}

/// Returns the rule name, or `#<index>` for unnamed rules.
pub(crate) fn rule_label(name: Option<&str>, index: usize) -> String {
    name.map_or_else(|| format!("#{index}"), str::to_string)
}

/// A transform rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformRuleConfig {
    /// Rule name, used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Condition gating the rule. Empty means always.
    #[serde(rename = "if", default)]
    pub condition: String,
    /// Actions applied in order when the rule matches.
    #[serde(default)]
    pub actions: Vec<TransformAction>,
    /// Child rules evaluated in order after the actions.
    #[serde(default)]
    pub children: Vec<TransformRuleConfig>,
}

/// A field mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransformAction {
    /// Writes `value` into `field`.
    Set {
        /// Target field.
        field: FieldRef,
        /// Value to write. May hold `{{ capture }}` and `{{ field }}` placeholders.
        value: String,
    },
    /// Clears `field`.
    Unset {
        /// Target field.
        field: FieldRef,
    },
    /// Matches `field` against a regex and records its named groups.
    Regex {
        /// Field to read.
        field: FieldRef,
        /// Pattern with named groups such as `(?P<service>\w+)`.
        #[serde(rename = "match")]
        pattern: String,
    },
}

/// A silence rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SilenceRuleConfig {
    /// Rule name, recorded on muted alerts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Condition selecting alerts to mute. Empty means always.
    #[serde(rename = "if", default)]
    pub condition: String,
    /// When the silence is active.
    #[serde(default)]
    pub schedule: ScheduleSpec,
    /// Also skip storage and the remaining stages.
    #[serde(default)]
    pub drop: bool,
}

/// A grouping rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupingRuleConfig {
    /// Rule name, used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Condition selecting alerts. Empty means always.
    #[serde(rename = "if", default)]
    pub condition: String,
    /// Fields whose values identify the group, in order.
    pub group_by: Vec<FieldRef>,
}

/// What the rate limiter does when its counter store fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Surface a recoverable error so the message is requeued.
    #[default]
    Fail,
    /// Let the alert through unlimited.
    Allow,
}

impl FromStr for OnError {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "allow" => Ok(Self::Allow),
            other => Err(PipelineError::config(format!(
                "unknown on_error policy '{other}', expected 'fail' or 'allow'"
            ))),
        }
    }
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => write!(f, "fail"),
            Self::Allow => write!(f, "allow"),
        }
    }
}

/// The global rate-limit rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Condition selecting limited alerts. Empty means every alert.
    #[serde(rename = "if", default)]
    pub condition: String,
    /// Alerts allowed per group and bucket.
    pub burst: u64,
    /// Bucket length in seconds.
    pub period_secs: u64,
    /// Counter store failure policy.
    #[serde(default)]
    pub on_error: OnError,
}

impl RateLimitConfig {
    /// Validates the rule.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if `period_secs` or `burst` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.period_secs == 0 {
            return Err(PipelineError::config(
                "rate_limit.period_secs must be at least 1",
            ));
        }
        if self.burst == 0 {
            return Err(PipelineError::config("rate_limit.burst must be at least 1"));
        }
        Ok(())
    }
}

/// A notification routing rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationRuleConfig {
    /// Rule name, used in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Condition selecting alerts. Empty means always.
    #[serde(rename = "if", default)]
    pub condition: String,
    /// Destinations to route to.
    pub channels: Vec<Destination>,
    /// Stop evaluating later rules after this one matches.
    #[serde(default)]
    pub terminal: bool,
}

/// A notification destination, written `kind/name` or `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Channel kind, `default` when omitted.
    pub kind: String,
    /// Channel name.
    pub name: String,
}

impl Destination {
    /// The kind used when a destination is written without one.
    pub const DEFAULT_KIND: &'static str = "default";

    /// Creates a destination.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl FromStr for Destination {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (kind, name) = s.split_once('/').unwrap_or((Self::DEFAULT_KIND, s));
        if kind.is_empty() || name.is_empty() || name.contains('/') {
            return Err(PipelineError::config(format!(
                "invalid notification destination '{s}', expected 'kind/name' or 'name'"
            )));
        }
        Ok(Self::new(kind, name))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl Serialize for Destination {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
name: production
transform_rules:
  - name: normalize
    if: severity_text == 'err'
    actions:
      - action: set
        field: severity_text
        value: error
      - action: unset
        field: labels[tmp]
    children:
      - if: labels[env] == 'prod'
        actions:
          - action: set
            field: severity_number
            value: "17"
silence_rules:
  - name: weekend-dev
    if: labels[env] == 'dev'
    schedule:
      type: weekly
      from: { weekday: friday, time: "17:30" }
      to: { weekday: monday, time: "08:30" }
      timezone: Asia/Tokyo
  - name: noisy
    if: body[message] =~ 'heartbeat'
    drop: true
grouping_rules:
  - name: per-host
    if: has labels[host.name]
    group_by: ["labels[host.name]", severity_text]
default_group_by: ["labels[service]"]
rate_limit:
  burst: 3
  period_secs: 60
  on_error: allow
notification_rules:
  - name: oncall
    if: severity_number == '21'
    channels: [mail/oncall, pager]
    terminal: true
default_notification_channels: [mail/default]
"#;

    mod parse_tests {
        use super::*;

        #[test]
        fn parses_full_document() {
            let config = PipelineConfig::from_yaml(FULL).unwrap();
            assert_eq!(config.name, "production");
            assert_eq!(config.transform_rules.len(), 1);
            assert_eq!(config.transform_rules[0].actions.len(), 2);
            assert_eq!(config.transform_rules[0].children.len(), 1);
            assert_eq!(
                config.transform_rules[0].actions[1],
                TransformAction::Unset {
                    field: FieldRef::keyed("labels", "tmp")
                }
            );
            assert_eq!(config.silence_rules.len(), 2);
            assert_eq!(config.silence_rules[0].condition, "labels[env] == 'dev'");
            assert!(matches!(config.silence_rules[0].schedule, ScheduleSpec::Weekly { .. }));
            assert_eq!(config.silence_rules[1].schedule, ScheduleSpec::Always);
            assert!(config.silence_rules[1].drop);
            assert_eq!(config.grouping_rules[0].group_by.len(), 2);
            assert_eq!(config.default_group_by, vec![FieldRef::keyed("labels", "service")]);
            let rate_limit = config.rate_limit.as_ref().unwrap();
            assert_eq!(rate_limit.burst, 3);
            assert_eq!(rate_limit.on_error, OnError::Allow);
            assert_eq!(
                config.notification_rules[0].channels,
                vec![Destination::new("mail", "oncall"), Destination::new("default", "pager")]
            );
            assert!(config.validate().is_ok());
        }

        #[test]
        fn empty_document_is_default() {
            let config = PipelineConfig::from_yaml("{}").unwrap();
            assert_eq!(config, PipelineConfig::default());
            assert!(config.validate().is_ok());
        }

        #[test]
        fn parses_regex_action() {
            let config = PipelineConfig::from_yaml(
                r"
transform_rules:
  - actions:
      - { action: regex, field: 'body[message]', match: '^(?P<svc>\w+):' }
",
            )
            .unwrap();
            assert_eq!(
                config.transform_rules[0].actions[0],
                TransformAction::Regex {
                    field: FieldRef::keyed("body", "message"),
                    pattern: r"^(?P<svc>\w+):".to_string(),
                }
            );
        }

        #[test]
        fn accepts_ratelimit_alias() {
            let config =
                PipelineConfig::from_yaml("ratelimit: { burst: 5, period_secs: 10 }").unwrap();
            assert_eq!(config.rate_limit.unwrap().on_error, OnError::Fail);
        }

        #[test]
        fn rejects_unknown_sections() {
            assert!(matches!(
                PipelineConfig::from_yaml("snooze_rules: []"),
                Err(PipelineError::Yaml(_))
            ));
        }

        #[test]
        fn rejects_invalid_field_reference() {
            let doc = "default_group_by: [labels]";
            assert!(PipelineConfig::from_yaml(doc).is_err());
        }

        #[test]
        fn from_file_reads_yaml() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("pipeline.yaml");
            std::fs::write(&path, FULL).unwrap();
            let config = PipelineConfig::from_file(&path).unwrap();
            assert_eq!(config.name, "production");
        }

        #[test]
        fn from_file_missing() {
            let err = PipelineConfig::from_file("/nonexistent/pipeline.yaml").unwrap_err();
            assert!(matches!(err, PipelineError::Io { .. }));
            assert!(err.to_string().contains("/nonexistent/pipeline.yaml"));
        }
    }

    mod validate_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(0, 60, "period_secs"; "zero period")]
        #[test_case(0, 0, "period_secs"; "both zero")]
        #[test_case(3, 0, "period_secs"; "zero period with burst")]
        #[test_case(0, 5, "burst"; "zero burst")]
        fn rejects_bad_rate_limit(burst: u64, period_secs: u64, needle: &str) {
            let config = PipelineConfig {
                rate_limit: Some(RateLimitConfig {
                    condition: String::new(),
                    burst,
                    period_secs,
                    on_error: OnError::Fail,
                }),
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(needle), "{err}");
        }

        #[test]
        fn rejects_empty_group_by() {
            let config = PipelineConfig {
                grouping_rules: vec![GroupingRuleConfig::default()],
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("'#0'"), "{err}");
        }

        #[test]
        fn rejects_notification_rule_without_channels() {
            let config = PipelineConfig {
                notification_rules: vec![NotificationRuleConfig {
                    name: Some("nobody".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            };
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("'nobody'"), "{err}");
        }

        #[test]
        fn rejects_empty_name() {
            let config = PipelineConfig {
                name: " ".to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }

    mod destination_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("mail/oncall", "mail", "oncall"; "kind and name")]
        #[test_case("pager", "default", "pager"; "name only")]
        #[test_case(" slack/ops ", "slack", "ops"; "trimmed")]
        fn parses(text: &str, kind: &str, name: &str) {
            let dest: Destination = text.parse().unwrap();
            assert_eq!(dest, Destination::new(kind, name));
        }

        #[test_case(""; "empty")]
        #[test_case("/x"; "empty kind")]
        #[test_case("mail/"; "empty name")]
        #[test_case("a/b/c"; "too many parts")]
        fn rejects(text: &str) {
            assert!(text.parse::<Destination>().is_err());
        }

        #[test]
        fn renders_with_kind() {
            assert_eq!(Destination::new("default", "pager").to_string(), "default/pager");
        }

        #[test_case("fail", OnError::Fail; "fail")]
        #[test_case("ALLOW", OnError::Allow; "allow uppercase")]
        fn on_error_parses(text: &str, expected: OnError) {
            assert_eq!(text.parse::<OnError>().unwrap(), expected);
        }

        #[test]
        fn on_error_rejects_unknown() {
            assert!("ignore".parse::<OnError>().is_err());
        }
    }
}
