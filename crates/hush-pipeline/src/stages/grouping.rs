//! Grouping stage: derives the group hash.
//!
//! The hash is a BLAKE3 digest over the ordered `(field, value)` pairs named
//! by the first matching rule, or by `default_group_by` when none matches.
//! Fields missing from the alert are left out of the digest.

use std::collections::HashMap;

use hush_core::{Alert, FieldRef};
use tracing::debug;

use super::RuleCondition;
use crate::config::{GroupingRuleConfig, rule_label};
use crate::error::{PipelineError, Result};

const STAGE: &str = "grouping";

/// A compiled grouping rule.
#[derive(Debug, Clone)]
pub struct GroupingRule {
    label: String,
    condition: RuleCondition,
    group_by: Vec<FieldRef>,
}

impl GroupingRule {
    /// The fields that identify the group.
    #[must_use]
    pub fn group_by(&self) -> &[FieldRef] {
        &self.group_by
    }
}

/// Computes the group hash of `alert` over `fields`.
///
/// Returns the hex digest and the field values that went into it.
#[must_use]
pub fn group_hash(alert: &Alert, fields: &[FieldRef]) -> (String, HashMap<String, String>) {
    let mut hasher = blake3::Hasher::new();
    let mut labels = HashMap::new();
    for field in fields {
        let Some(value) = field.get(alert) else {
            continue;
        };
        let name = field.to_string();
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for part in [name.as_bytes(), value.as_bytes()] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        labels.insert(name, value);
    }
    (hasher.finalize().to_hex().to_string(), labels)
}

fn check_fields(fields: &[FieldRef], label: &str) -> Result<()> {
    for field in fields {
        field.validate().map_err(|source| PipelineError::InvalidRule {
            stage: STAGE,
            rule: label.to_string(),
            source,
        })?;
    }
    Ok(())
}

/// The compiled grouping stage.
#[derive(Debug, Clone, Default)]
pub struct GroupingStage {
    rules: Vec<GroupingRule>,
    default_group_by: Vec<FieldRef>,
}

impl GroupingStage {
    /// Compiles the grouping rules and the fallback field list.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRule`] for a bad condition or field.
    pub fn compile(configs: &[GroupingRuleConfig], default_group_by: &[FieldRef]) -> Result<Self> {
        let mut rules = Vec::with_capacity(configs.len());
        for (i, config) in configs.iter().enumerate() {
            let label = rule_label(config.name.as_deref(), i);
            let condition =
                RuleCondition::compile(STAGE, config.name.as_deref(), i, &config.condition)?;
            check_fields(&config.group_by, &label)?;
            rules.push(GroupingRule {
                label,
                condition,
                group_by: config.group_by.clone(),
            });
        }
        check_fields(default_group_by, "default_group_by")?;
        Ok(Self {
            rules,
            default_group_by: default_group_by.to_vec(),
        })
    }

    /// The compiled rules.
    #[must_use]
    pub fn rules(&self) -> &[GroupingRule] {
        &self.rules
    }

    /// Sets the alert's group hash and group labels.
    pub fn process(&self, alert: &mut Alert) {
        let fields = match self.rules.iter().find(|r| r.condition.test(alert)) {
            Some(rule) => {
                debug!(alert_id = %alert.id, stage = STAGE, rule = %rule.label, condition = %rule.condition, "rule matched");
                &rule.group_by
            }
            None => &self.default_group_by,
        };
        let (hash, labels) = group_hash(alert, fields);
        alert.group_hash = hash;
        alert.group_labels = labels;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use hush_core::Source;
    use proptest::prelude::*;

    fn stage(yaml: &str) -> GroupingStage {
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        GroupingStage::compile(&config.grouping_rules, &config.default_group_by).unwrap()
    }

    fn fields(items: &[&str]) -> Vec<FieldRef> {
        items.iter().map(|f| FieldRef::parse(f).unwrap()).collect()
    }

    const RULES: &str = r#"
grouping_rules:
  - name: per-host
    if: has labels[process]
    group_by: ["labels[host]", "labels[process]"]
default_group_by: ["labels[service]"]
"#;

    mod hash_tests {
        use super::*;

        #[test]
        fn hash_is_hex_blake3() {
            let (hash, labels) = group_hash(&Alert::new(Source::default()), &[]);
            assert_eq!(hash.len(), 64);
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(labels.is_empty());
        }

        #[test]
        fn missing_fields_are_skipped() {
            let alert = Alert::new(Source::default()).label("host", "a");
            let (with_missing, labels) = group_hash(&alert, &fields(&["labels[host]", "labels[nope]"]));
            let (without, _) = group_hash(&alert, &fields(&["labels[host]"]));
            assert_eq!(with_missing, without);
            assert_eq!(labels.len(), 1);
            assert_eq!(labels.get("labels[host]").map(String::as_str), Some("a"));
        }

        #[test]
        fn field_names_are_part_of_the_hash() {
            let alert = Alert::new(Source::default()).label("a", "x").attribute("a", "x");
            let (by_label, _) = group_hash(&alert, &fields(&["labels[a]"]));
            let (by_attribute, _) = group_hash(&alert, &fields(&["attributes[a]"]));
            assert_ne!(by_label, by_attribute);
        }

        #[test]
        fn boundaries_between_values_matter() {
            let one = Alert::new(Source::default()).label("a", "ab").label("b", "c");
            let two = Alert::new(Source::default()).label("a", "a").label("b", "bc");
            let group_by = fields(&["labels[a]", "labels[b]"]);
            assert_ne!(group_hash(&one, &group_by).0, group_hash(&two, &group_by).0);
        }

        proptest! {
            #[test]
            fn unrelated_fields_do_not_change_the_hash(
                host in "[a-z0-9-]{1,16}",
                noise in "[a-z0-9 ]{0,32}",
                severity in 1i32..24,
            ) {
                let group_by = fields(&["labels[host]", "severity_text"]);
                let one = Alert::new(Source::default())
                    .with_severity("error", 17)
                    .label("host", host.clone());
                let two = Alert::new(Source::new("otlp", "other"))
                    .with_severity("error", severity)
                    .label("host", host)
                    .body_entry("message", noise);
                prop_assert_eq!(group_hash(&one, &group_by).0, group_hash(&two, &group_by).0);
            }

            #[test]
            fn named_field_changes_the_hash(a in "[a-z]{1,12}", b in "[a-z]{1,12}") {
                prop_assume!(a != b);
                let group_by = fields(&["labels[host]"]);
                let one = Alert::new(Source::default()).label("host", a);
                let two = Alert::new(Source::default()).label("host", b);
                prop_assert_ne!(group_hash(&one, &group_by).0, group_hash(&two, &group_by).0);
            }
        }
    }

    mod stage_tests {
        use super::*;

        #[test]
        fn rules_reject_unknown_fields() {
            let config = PipelineConfig {
                default_group_by: vec![FieldRef::keyed("bogus", "x")],
                ..PipelineConfig::default()
            };
            let err = GroupingStage::compile(&config.grouping_rules, &config.default_group_by)
                .unwrap_err();
            assert!(matches!(err, PipelineError::InvalidRule { ref rule, .. } if rule == "default_group_by"));
        }

        #[test]
        fn default_group_by_applies_without_match() {
            let stage = stage(RULES);
            let mut alert = Alert::new(Source::new("otlp", "x")).label("service", "checkout");
            stage.process(&mut alert);
            let (expected, _) = group_hash(&alert, &fields(&["labels[service]"]));
            assert_eq!(alert.group_hash, expected);
            assert_eq!(alert.group_labels.get("labels[service]").map(String::as_str), Some("checkout"));
        }

        #[test]
        fn matching_rule_replaces_group_labels() {
            let stage = stage(RULES);
            let mut alert = Alert::new(Source::new("syslog", "x"))
                .label("host", "h1")
                .label("process", "sshd")
                .label("service", "checkout");
            alert.group_labels.insert("stale".into(), "1".into());
            stage.process(&mut alert);
            assert_eq!(alert.group_labels.len(), 2);
            assert!(!alert.group_labels.contains_key("stale"));
        }

        #[test]
        fn no_rules_hash_the_empty_set() {
            let stage = GroupingStage::default();
            let mut one = Alert::new(Source::default()).label("host", "a");
            let mut two = Alert::new(Source::default()).label("host", "b");
            stage.process(&mut one);
            stage.process(&mut two);
            assert_eq!(one.group_hash, two.group_hash);
            assert!(one.group_labels.is_empty());
        }
    }
}
