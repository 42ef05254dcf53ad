//! Transform stage: rewrites alert fields.
//!
//! Top-level rules are first-match. A matching rule runs its actions in
//! order, then evaluates each of its children against the already-mutated
//! alert, so a child can observe what an earlier sibling wrote.
//!
//! `regex` actions record named groups that later `set` values in the same
//! pass can reference as `{{ name }}`. Captures start empty for every alert.

use hush_core::{Alert, Captures, CoreError, FieldRef, Template};
use regex::Regex;
use tracing::debug;

use super::RuleCondition;
use crate::config::{TransformAction, TransformRuleConfig};
use crate::error::{PipelineError, Result};

const STAGE: &str = "transform";

#[derive(Debug, Clone)]
enum Action {
    Set { field: FieldRef, value: Template },
    Unset { field: FieldRef },
    Capture { field: FieldRef, pattern: Regex },
}

impl Action {
    fn compile(action: &TransformAction) -> std::result::Result<Self, CoreError> {
        match action {
            TransformAction::Set { field, value } => {
                field.validate()?;
                let value = Template::parse(value)?;
                if let Some(literal) = value.as_literal() {
                    field.check_value(literal)?;
                }
                Ok(Self::Set {
                    field: field.clone(),
                    value,
                })
            }
            TransformAction::Unset { field } => {
                field.validate()?;
                Ok(Self::Unset {
                    field: field.clone(),
                })
            }
            TransformAction::Regex { field, pattern } => {
                field.validate()?;
                let compiled = Regex::new(pattern).map_err(|source| CoreError::InvalidRegex {
                    pattern: pattern.clone(),
                    source,
                })?;
                Ok(Self::Capture {
                    field: field.clone(),
                    pattern: compiled,
                })
            }
        }
    }

    fn apply(&self, alert: &mut Alert, captures: &mut Captures) -> Result<()> {
        match self {
            Self::Set { field, value } => {
                let rendered = value.render(alert, captures);
                field.set(alert, &rendered).map_err(|e| PipelineError::Rejected {
                    reason: format!("cannot set {field}: {e}"),
                })
            }
            Self::Unset { field } => {
                field.reset(alert);
                Ok(())
            }
            Self::Capture { field, pattern } => {
                let text = field.get(alert).unwrap_or_default();
                if let Some(found) = pattern.captures(&text) {
                    for name in pattern.capture_names().flatten() {
                        let value = found.name(name).map_or("", |m| m.as_str());
                        captures.insert(name.to_string(), value.to_string());
                    }
                }
                Ok(())
            }
        }
    }
}

/// A compiled transform rule with its subtree.
#[derive(Debug, Clone)]
pub struct TransformRule {
    label: String,
    condition: RuleCondition,
    actions: Vec<Action>,
    children: Vec<TransformRule>,
}

impl TransformRule {
    /// `path` is the rule's position in the tree, `0.1` for the second child
    /// of the first rule.
    fn compile(config: &TransformRuleConfig, path: &str) -> Result<Self> {
        let label = config.name.clone().unwrap_or_else(|| format!("#{path}"));
        let condition = RuleCondition::compile_as(STAGE, || label.clone(), &config.condition)?;
        let actions = config
            .actions
            .iter()
            .map(Action::compile)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| PipelineError::InvalidRule {
                stage: STAGE,
                rule: label.clone(),
                source,
            })?;
        let children = config
            .children
            .iter()
            .enumerate()
            .map(|(i, child)| Self::compile(child, &format!("{path}.{i}")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            label,
            condition,
            actions,
            children,
        })
    }

    /// Returns the rule name, or its position in the tree when unnamed.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Compiled child rules.
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// Number of rules in this subtree, the rule itself included.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Self::size).sum::<usize>()
    }

    fn apply(&self, alert: &mut Alert, captures: &mut Captures) -> Result<()> {
        debug!(alert_id = %alert.id, stage = STAGE, rule = %self.label, condition = %self.condition, "rule matched");
        for action in &self.actions {
            action.apply(alert, captures)?;
        }
        for child in &self.children {
            if child.condition.test(alert) {
                child.apply(alert, captures)?;
            }
        }
        Ok(())
    }
}

/// The compiled transform stage.
#[derive(Debug, Clone, Default)]
pub struct TransformStage {
    rules: Vec<TransformRule>,
}

impl TransformStage {
    /// Compiles the transform rules.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidRule`] for the first rule that does
    /// not compile, including a bad regex, a malformed `{{ }}` placeholder or
    /// a literal `severity_number` that is not an integer.
    pub fn compile(configs: &[TransformRuleConfig]) -> Result<Self> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(i, c)| TransformRule::compile(c, &i.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Top-level rules.
    #[must_use]
    pub fn rules(&self) -> &[TransformRule] {
        &self.rules
    }

    /// Applies the first matching rule. Returns its label.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Rejected`] if a value cannot be written,
    /// such as a templated `severity_number` that renders to a non-integer.
    pub fn process(&self, alert: &mut Alert) -> Result<Option<String>> {
        let Some(rule) = self.rules.iter().find(|r| r.condition.test(alert)) else {
            return Ok(None);
        };
        let mut captures = Captures::new();
        rule.apply(alert, &mut captures)?;
        Ok(Some(rule.label.clone()))
    }
}
