//! Field references: addressable locations inside an [`Alert`].
//!
//! A field reference is a name from a fixed allow-list plus an optional
//! sub-key. Map-typed fields (`labels`, `attributes`, `group_labels`, `body`)
//! require a sub-key; scalar fields (`severity_number`, `severity_text`)
//! forbid one. References render as `name` or `name[sub_key]`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, Result};
use crate::types::Alert;

/// The fields of an alert that rules may read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// `severity_number`
    SeverityNumber,
    /// `severity_text`
    SeverityText,
    /// `group_labels[...]`
    GroupLabels,
    /// `labels[...]`
    Labels,
    /// `attributes[...]`
    Attributes,
    /// `body[...]`
    Body,
}

impl FieldKind {
    /// Every addressable field.
    pub const ALL: [Self; 6] = [
        Self::SeverityNumber,
        Self::SeverityText,
        Self::GroupLabels,
        Self::Labels,
        Self::Attributes,
        Self::Body,
    ];

    /// Resolves a field name, or `None` if it is not addressable.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "severity_number" => Some(Self::SeverityNumber),
            "severity_text" => Some(Self::SeverityText),
            "group_labels" => Some(Self::GroupLabels),
            "labels" => Some(Self::Labels),
            "attributes" => Some(Self::Attributes),
            "body" => Some(Self::Body),
            _ => None,
        }
    }

    /// Returns the field name as written in rules.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SeverityNumber => "severity_number",
            Self::SeverityText => "severity_text",
            Self::GroupLabels => "group_labels",
            Self::Labels => "labels",
            Self::Attributes => "attributes",
            Self::Body => "body",
        }
    }

    /// Returns true for map-typed fields, which require a sub-key.
    #[must_use]
    pub const fn is_map(self) -> bool {
        matches!(
            self,
            Self::GroupLabels | Self::Labels | Self::Attributes | Self::Body
        )
    }

    fn map(self, alert: &Alert) -> Option<&HashMap<String, String>> {
        match self {
            Self::GroupLabels => Some(&alert.group_labels),
            Self::Labels => Some(&alert.labels),
            Self::Attributes => Some(&alert.attributes),
            Self::Body => Some(&alert.body),
            Self::SeverityNumber | Self::SeverityText => None,
        }
    }

    fn map_mut(self, alert: &mut Alert) -> Option<&mut HashMap<String, String>> {
        match self {
            Self::GroupLabels => Some(&mut alert.group_labels),
            Self::Labels => Some(&mut alert.labels),
            Self::Attributes => Some(&mut alert.attributes),
            Self::Body => Some(&mut alert.body),
            Self::SeverityNumber | Self::SeverityText => None,
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to one scalar or map entry of an [`Alert`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// The field name.
    pub name: String,
    /// The map key, for map-typed fields.
    pub sub_key: Option<String>,
}

/// Returns true for characters allowed in a field name.
pub(crate) const fn is_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c == '_'
}

/// Returns true for characters allowed in a sub-key.
pub(crate) const fn is_sub_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | '/' | '_' | '-')
}

impl FieldRef {
    /// Creates an unvalidated reference to a scalar field.
    #[must_use]
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_key: None,
        }
    }

    /// Creates an unvalidated reference to a map entry.
    #[must_use]
    pub fn keyed(name: impl Into<String>, sub_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_key: Some(sub_key.into()),
        }
    }

    /// Parses and validates `name` or `name[sub_key]`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] on malformed syntax and
    /// [`CoreError::InvalidField`] if the reference fails [`validate`](Self::validate).
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let name_end = trimmed
            .find(|c: char| !is_name_char(c))
            .unwrap_or(trimmed.len());
        if name_end == 0 {
            return Err(CoreError::parse(text, 0, "expected a field name"));
        }
        let name = &trimmed[..name_end];
        let rest = &trimmed[name_end..];

        let field = if rest.is_empty() {
            Self::scalar(name)
        } else {
            let Some(inner) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) else {
                return Err(CoreError::parse(
                    text,
                    name_end,
                    "expected '[' sub-key ']' or end of field",
                ));
            };
            if let Some(pos) = inner.find(|c: char| !is_sub_key_char(c)) {
                return Err(CoreError::parse(
                    text,
                    name_end + 1 + pos,
                    "invalid character in sub-key",
                ));
            }
            Self::keyed(name, inner)
        };
        field.validate()?;
        Ok(field)
    }

    /// Resolves the field kind, or `None` for an unknown name.
    #[must_use]
    pub fn kind(&self) -> Option<FieldKind> {
        FieldKind::from_name(&self.name)
    }

    /// Checks the name against the allow-list and the sub-key against the
    /// field's cardinality.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        let Some(kind) = self.kind() else {
            return Err(self.invalid("unknown field"));
        };
        let has_key = self.sub_key.as_deref().is_some_and(|k| !k.is_empty());
        match (kind.is_map(), has_key) {
            (true, false) => Err(self.invalid("sub-key is required")),
            (false, true) => Err(self.invalid("sub-key is not allowed")),
            _ => Ok(()),
        }
    }

    /// Reads the referenced value.
    ///
    /// Returns `None` when the map entry is absent, when the scalar holds
    /// its zero value, or when the name is unknown.
    #[must_use]
    pub fn get(&self, alert: &Alert) -> Option<String> {
        match self.kind()? {
            FieldKind::SeverityNumber => {
                (alert.severity_number != 0).then(|| alert.severity_number.to_string())
            }
            FieldKind::SeverityText => {
                (!alert.severity_text.is_empty()).then(|| alert.severity_text.clone())
            }
            kind => {
                let key = self.sub_key.as_deref()?;
                kind.map(alert)?.get(key).cloned()
            }
        }
    }

    /// Writes `value` into the referenced location.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] for an unknown field or missing
    /// sub-key, and [`CoreError::InvalidValue`] if `severity_number` is given
    /// a non-integer.
    pub fn set(&self, alert: &mut Alert, value: &str) -> Result<()> {
        match self.kind() {
            Some(FieldKind::SeverityNumber) => {
                alert.severity_number = self.parse_severity(value)?;
            }
            Some(FieldKind::SeverityText) => {
                alert.severity_text = value.to_string();
            }
            Some(kind) => {
                let Some(key) = self.sub_key.as_deref().filter(|k| !k.is_empty()) else {
                    return Err(self.invalid("sub-key is required"));
                };
                if let Some(map) = kind.map_mut(alert) {
                    map.insert(key.to_string(), value.to_string());
                }
            }
            None => return Err(self.invalid("unknown field")),
        }
        Ok(())
    }

    /// Clears the referenced location. Unknown fields are ignored.
    pub fn reset(&self, alert: &mut Alert) {
        match self.kind() {
            Some(FieldKind::SeverityNumber) => alert.severity_number = 0,
            Some(FieldKind::SeverityText) => alert.severity_text.clear(),
            Some(kind) => {
                if let (Some(key), Some(map)) = (self.sub_key.as_deref(), kind.map_mut(alert)) {
                    map.remove(key);
                }
            }
            None => {}
        }
    }

    /// Checks that `value` can be written into this field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidValue`] if the value does not fit.
    pub fn check_value(&self, value: &str) -> Result<()> {
        if self.kind() == Some(FieldKind::SeverityNumber) {
            self.parse_severity(value)?;
        }
        Ok(())
    }

    fn parse_severity(&self, value: &str) -> Result<i32> {
        value
            .trim()
            .parse::<i32>()
            .map_err(|e| CoreError::InvalidValue {
                field: self.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    fn invalid(&self, reason: &str) -> CoreError {
        CoreError::InvalidField {
            field: self.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_key {
            Some(key) => write!(f, "{}[{key}]", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl Serialize for FieldRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Source;

    fn alert() -> Alert {
        Alert::new(Source::new("otlp", "collector"))
            .with_severity("error", 17)
            .label("host.name", "host01")
            .attribute("k8s.pod", "api-0")
            .body_entry("message", "disk full")
    }

    mod validate_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(FieldRef::keyed("labels", "host"); "labels with key")]
        #[test_case(FieldRef::keyed("group_labels", "service"); "group labels with key")]
        #[test_case(FieldRef::keyed("attributes", "a.b"); "attributes with key")]
        #[test_case(FieldRef::keyed("body", "message"); "body with key")]
        #[test_case(FieldRef::scalar("severity_number"); "severity number")]
        #[test_case(FieldRef::scalar("severity_text"); "severity text")]
        fn accepts(field: FieldRef) {
            assert!(field.validate().is_ok());
        }

        #[test_case(FieldRef::keyed("labels", ""), "sub-key is required"; "empty sub-key")]
        #[test_case(FieldRef::scalar("labels"), "sub-key is required"; "missing sub-key")]
        #[test_case(FieldRef::keyed("severity_number", "x"), "sub-key is not allowed"; "scalar with key")]
        #[test_case(FieldRef::scalar("bogus"), "unknown field"; "unknown")]
        fn rejects(field: FieldRef, reason: &str) {
            let err = field.validate().unwrap_err();
            assert!(err.to_string().contains(reason), "{err}");
            assert!(err.to_string().contains(&field.name), "{err}");
        }
    }

    mod parse_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("labels[host.name]", "labels", Some("host.name"); "dotted key")]
        #[test_case("attributes[a/b,c-d_e]", "attributes", Some("a/b,c-d_e"); "punctuated key")]
        #[test_case("severity_text", "severity_text", None; "scalar")]
        #[test_case("  body[message] ", "body", Some("message"); "surrounding whitespace")]
        fn parses(text: &str, name: &str, key: Option<&str>) {
            let field = FieldRef::parse(text).unwrap();
            assert_eq!(field.name, name);
            assert_eq!(field.sub_key.as_deref(), key);
        }

        #[test_case(""; "empty")]
        #[test_case("Labels[x]"; "uppercase name")]
        #[test_case("labels[x"; "unclosed bracket")]
        #[test_case("labels[a b]"; "space in key")]
        #[test_case("labels[]"; "empty key")]
        #[test_case("severity_number[x]"; "scalar with key")]
        #[test_case("nope"; "unknown name")]
        fn rejects(text: &str) {
            assert!(FieldRef::parse(text).is_err());
        }

        #[test]
        fn display_round_trips() {
            let field = FieldRef::parse("labels[host.name]").unwrap();
            assert_eq!(field.to_string(), "labels[host.name]");
            assert_eq!(FieldRef::parse(&field.to_string()).unwrap(), field);
        }

        #[test]
        fn deserializes_from_string() {
            let field: FieldRef = serde_json::from_str("\"body[message]\"").unwrap();
            assert_eq!(field, FieldRef::keyed("body", "message"));
            assert!(serde_json::from_str::<FieldRef>("\"bogus\"").is_err());
        }
    }

    mod access_tests {
        use super::*;

        #[test]
        fn get_reads_scalars_and_maps() {
            let alert = alert();
            assert_eq!(FieldRef::scalar("severity_number").get(&alert).as_deref(), Some("17"));
            assert_eq!(FieldRef::scalar("severity_text").get(&alert).as_deref(), Some("error"));
            assert_eq!(
                FieldRef::keyed("labels", "host.name").get(&alert).as_deref(),
                Some("host01")
            );
            assert_eq!(
                FieldRef::keyed("attributes", "k8s.pod").get(&alert).as_deref(),
                Some("api-0")
            );
        }

        #[test]
        fn get_treats_zero_and_missing_as_absent() {
            let empty = Alert::new(Source::default());
            assert_eq!(FieldRef::scalar("severity_number").get(&empty), None);
            assert_eq!(FieldRef::scalar("severity_text").get(&empty), None);
            assert_eq!(FieldRef::keyed("labels", "host").get(&alert()), None);
            assert_eq!(FieldRef::scalar("bogus").get(&alert()), None);
        }

        #[test]
        fn set_writes_scalars_and_creates_entries() {
            let mut alert = Alert::new(Source::default());
            FieldRef::scalar("severity_number").set(&mut alert, "9").unwrap();
            FieldRef::scalar("severity_text").set(&mut alert, "warning").unwrap();
            FieldRef::keyed("group_labels", "team").set(&mut alert, "sre").unwrap();
            assert_eq!(alert.severity_number, 9);
            assert_eq!(alert.severity_text, "warning");
            assert_eq!(alert.group_labels.get("team").map(String::as_str), Some("sre"));
        }

        #[test]
        fn set_rejects_unknown_and_bad_severity() {
            let mut alert = alert();
            assert!(matches!(
                FieldRef::scalar("bogus").set(&mut alert, "x"),
                Err(CoreError::InvalidField { .. })
            ));
            assert!(matches!(
                FieldRef::scalar("severity_number").set(&mut alert, "high"),
                Err(CoreError::InvalidValue { .. })
            ));
            assert_eq!(alert.severity_number, 17);
        }

        #[test]
        fn reset_clears_and_ignores_unknown() {
            let mut alert = alert();
            FieldRef::scalar("severity_number").reset(&mut alert);
            FieldRef::scalar("severity_text").reset(&mut alert);
            FieldRef::keyed("labels", "host.name").reset(&mut alert);
            FieldRef::keyed("labels", "never-there").reset(&mut alert);
            FieldRef::scalar("bogus").reset(&mut alert);
            assert_eq!(alert.severity_number, 0);
            assert!(alert.severity_text.is_empty());
            assert!(alert.labels.is_empty());
            assert_eq!(alert.body.len(), 1);
        }

        #[test]
        fn check_value_only_constrains_severity_number() {
            assert!(FieldRef::scalar("severity_number").check_value("3").is_ok());
            assert!(FieldRef::scalar("severity_number").check_value("three").is_err());
            assert!(FieldRef::keyed("labels", "x").check_value("anything").is_ok());
        }
    }

    #[test]
    fn field_kind_names_round_trip() {
        for kind in FieldKind::ALL {
            assert_eq!(FieldKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(FieldKind::from_name("source"), None);
    }
}
