//! Core types for the alert pipeline.
//!
//! This module provides the unit of work that flows through every stage:
//! - [`Alert`]: one alert event with its data and pipeline state
//! - [`Source`]: where the alert came from
//! - [`Mute`]: the mute marking applied by silences
//! - [`RateLimitStatus`]: the outcome of the rate-limit stage

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The source an alert was received from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Source kind or protocol (e.g. `syslog`, `otlp`, `prometheus`).
    pub kind: String,
    /// The source instance name (e.g. `prod-relay`, `host01`).
    pub name: String,
}

impl Source {
    /// Creates a new source.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Mute marking applied to an alert by the silence stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Mute {
    /// Whether the alert is muted.
    pub enabled: bool,
    /// The component that muted the alert (e.g. `silence`).
    pub component: String,
    /// Name of the rule that muted the alert.
    pub rule: String,
    /// Skip the notification stage.
    pub skip_notification: bool,
    /// Skip persisting the alert.
    pub skip_storage: bool,
}

impl Mute {
    /// Returns a mute marking set by `component` on behalf of `rule`.
    #[must_use]
    pub fn by(component: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            enabled: true,
            component: component.into(),
            rule: rule.into(),
            skip_notification: true,
            skip_storage: false,
        }
    }
}

/// Outcome of the rate-limit stage for one alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitStatus {
    /// Whether the alert's group exceeded its burst in the current bucket.
    pub limited: bool,
    /// The counter value observed after this alert was counted.
    pub count: u64,
}

/// One alert event.
///
/// Map-typed fields use string keys and string values so that every value
/// is addressable by a [`FieldRef`](crate::FieldRef).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    /// Correlation identifier, generated when the producer leaves it empty.
    #[serde(default)]
    pub id: String,
    /// Where the alert came from.
    #[serde(default)]
    pub source: Source,
    /// When the event happened.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// When the event was observed by the collector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_timestamp: Option<DateTime<Utc>>,
    /// Hex digest identifying the alert's group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_hash: String,
    /// The field values the group hash was computed from.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub group_labels: HashMap<String, String>,
    /// Text representing the severity.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub severity_text: String,
    /// Number representing the severity (0 means unset).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub severity_number: i32,
    /// Key-values identifying the resource the alert is about.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    /// Additional, non-identifying attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    /// The main body of the alert.
    #[serde(default)]
    pub body: HashMap<String, String>,
    /// Mute marking.
    #[serde(default)]
    pub mute: Mute,
    /// Rate-limit status.
    #[serde(default)]
    pub rate_limit: RateLimitStatus,
    /// Notification destinations the alert was routed to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl Alert {
    /// Creates an empty alert from the given source, timestamped now.
    #[must_use]
    pub fn new(source: Source) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            timestamp: Utc::now(),
            observed_timestamp: None,
            group_hash: String::new(),
            group_labels: HashMap::new(),
            severity_text: String::new(),
            severity_number: 0,
            labels: HashMap::new(),
            attributes: HashMap::new(),
            body: HashMap::new(),
            mute: Mute::default(),
            rate_limit: RateLimitStatus::default(),
            notifications: Vec::new(),
        }
    }

    /// Decodes an alert from a JSON payload.
    ///
    /// An alert without an id gets one derived from the payload bytes, so a
    /// redelivered message decodes to the same id every time.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload is not a valid alert.
    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        let mut alert: Self = serde_json::from_slice(payload)?;
        if alert.id.is_empty() {
            alert.id = Uuid::new_v5(&Uuid::NAMESPACE_OID, payload).to_string();
        }
        Ok(alert)
    }

    /// Sets the event timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the severity text and number.
    #[must_use]
    pub fn with_severity(mut self, text: impl Into<String>, number: i32) -> Self {
        self.severity_text = text.into();
        self.severity_number = number;
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds a body entry.
    #[must_use]
    pub fn body_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Returns true if the notification stage must skip this alert.
    #[must_use]
    pub const fn skips_notification(&self) -> bool {
        (self.mute.enabled && self.mute.skip_notification) || self.rate_limit.limited
    }

    /// Returns true if the alert must not be persisted.
    #[must_use]
    pub const fn skips_storage(&self) -> bool {
        self.mute.enabled && self.mute.skip_storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syslog_alert() -> Alert {
        Alert::new(Source::new("syslog", "prod-syslog-1"))
            .with_severity("error", 17)
            .label("host", "host-1")
            .label("process", "sshd")
            .body_entry("message", "connection closed by remote host")
    }

    #[test]
    fn new_alert_has_id_and_empty_state() {
        let alert = syslog_alert();
        assert!(!alert.id.is_empty());
        assert!(!alert.mute.enabled);
        assert!(!alert.rate_limit.limited);
        assert!(alert.notifications.is_empty());
        assert!(alert.group_hash.is_empty());
    }

    #[test]
    fn mute_by_skips_notification_only() {
        let mute = Mute::by("silence", "maintenance");
        assert!(mute.enabled);
        assert!(mute.skip_notification);
        assert!(!mute.skip_storage);
        assert_eq!(mute.component, "silence");
        assert_eq!(mute.rule, "maintenance");
    }

    #[test]
    fn skips_notification_when_muted_or_limited() {
        let mut alert = syslog_alert();
        assert!(!alert.skips_notification());

        alert.mute = Mute::by("silence", "x");
        assert!(alert.skips_notification());

        let mut limited = syslog_alert();
        limited.rate_limit.limited = true;
        assert!(limited.skips_notification());
    }

    #[test]
    fn skips_storage_requires_enabled_mute() {
        let mut alert = syslog_alert();
        alert.mute.skip_storage = true;
        assert!(!alert.skips_storage());
        alert.mute.enabled = true;
        assert!(alert.skips_storage());
    }

    #[test]
    fn json_uses_camel_case() {
        let alert = syslog_alert();
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["severityText"], "error");
        assert_eq!(json["severityNumber"], 17);
        assert_eq!(json["labels"]["host"], "host-1");
        assert!(json.get("groupHash").is_none());
    }

    #[test]
    fn from_json_fills_missing_id_and_defaults() {
        let payload = br#"{
            "source": {"kind": "otlp", "name": "collector-a"},
            "timestamp": "2024-04-19T10:30:00Z",
            "severityText": "warning",
            "labels": {"host.name": "host01"},
            "body": {"message": "disk almost full"}
        }"#;
        let alert = Alert::from_json(payload).unwrap();
        assert!(!alert.id.is_empty());
        assert_eq!(alert.source.kind, "otlp");
        assert_eq!(alert.severity_number, 0);
        assert_eq!(alert.labels.get("host.name").map(String::as_str), Some("host01"));
        assert!(!alert.mute.enabled);
    }

    #[test]
    fn from_json_derives_the_same_id_for_the_same_payload() {
        let payload = br#"{"labels": {"host": "h1"}}"#;
        let first = Alert::from_json(payload).unwrap();
        let again = Alert::from_json(payload).unwrap();
        assert_eq!(first.id, again.id);
        let other = Alert::from_json(br#"{"labels": {"host": "h2"}}"#).unwrap();
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn from_json_keeps_existing_id() {
        let payload = br#"{"id": "abc-123", "body": {}}"#;
        let alert = Alert::from_json(payload).unwrap();
        assert_eq!(alert.id, "abc-123");
    }

    #[test]
    fn from_json_rejects_garbage() {
        assert!(Alert::from_json(b"not json").is_err());
        assert!(Alert::from_json(br#"{"severityNumber": "high"}"#).is_err());
    }
}
