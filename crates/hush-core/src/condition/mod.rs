//! The condition language: boolean predicates over alert fields.
//!
//! Conditions are parsed and validated once, when rules are compiled, and
//! evaluated many times afterwards. Evaluation is pure: it never mutates the
//! alert and never fails.
//!
//! # Absent fields
//!
//! Every comparison evaluates to `false` when the referenced field is absent,
//! including `!=` and `!~`. `labels[env] != 'prod'` therefore only matches
//! alerts that carry an `env` label with a different value. Use
//! `!(labels[env] == 'prod')` to also match alerts without the label.
//!
//! # Example
//!
//! ```
//! use hush_core::{Alert, Condition, Source};
//!
//! let cond = Condition::parse("labels[host.name] == 'host01' and !has labels[ack]").unwrap();
//! let alert = Alert::new(Source::new("otlp", "collector")).label("host.name", "host01");
//! assert!(cond.test(&alert));
//! ```

mod lexer;
mod parser;

use std::fmt;

use regex::Regex;

use crate::error::{CoreError, Result};
use crate::field::FieldRef;
use crate::types::Alert;

/// A compiled boolean expression over alert fields.
#[derive(Debug, Clone)]
pub enum Condition {
    /// The field is present and equals the value.
    Equal {
        /// Field to compare.
        field: FieldRef,
        /// Expected value.
        value: String,
    },
    /// The field is present and differs from the value.
    NotEqual {
        /// Field to compare.
        field: FieldRef,
        /// Rejected value.
        value: String,
    },
    /// The field is present and matches the regular expression.
    Match {
        /// Field to match.
        field: FieldRef,
        /// Compiled pattern.
        regex: Regex,
    },
    /// The field is present and does not match the regular expression.
    NotMatch {
        /// Field to match.
        field: FieldRef,
        /// Compiled pattern.
        regex: Regex,
    },
    /// The field is present.
    Has {
        /// Field to look up.
        field: FieldRef,
    },
    /// Every child matches. Evaluated left to right, short-circuiting.
    And(Vec<Condition>),
    /// At least one child matches. Evaluated left to right, short-circuiting.
    Or(Vec<Condition>),
    /// The child does not match.
    Not(Box<Condition>),
}

impl Condition {
    /// Parses and validates a condition expression.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] for syntax errors and unknown fields, and
    /// [`CoreError::InvalidRegex`] for patterns that fail to compile.
    pub fn parse(input: &str) -> Result<Self> {
        parser::parse(input)
    }

    /// Builds a [`Condition::Match`], compiling `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is invalid or the pattern does not compile.
    pub fn matches(field: FieldRef, pattern: &str) -> Result<Self> {
        field.validate()?;
        Ok(Self::Match {
            field,
            regex: compile(pattern)?,
        })
    }

    /// Builds a [`Condition::NotMatch`], compiling `pattern`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is invalid or the pattern does not compile.
    pub fn not_matches(field: FieldRef, pattern: &str) -> Result<Self> {
        field.validate()?;
        Ok(Self::NotMatch {
            field,
            regex: compile(pattern)?,
        })
    }

    /// Evaluates the condition against an alert.
    #[must_use]
    pub fn test(&self, alert: &Alert) -> bool {
        match self {
            Self::Equal { field, value } => field.get(alert).is_some_and(|v| v == *value),
            Self::NotEqual { field, value } => field.get(alert).is_some_and(|v| v != *value),
            Self::Match { field, regex } => field.get(alert).is_some_and(|v| regex.is_match(&v)),
            Self::NotMatch { field, regex } => {
                field.get(alert).is_some_and(|v| !regex.is_match(&v))
            }
            Self::Has { field } => field.get(alert).is_some(),
            Self::And(children) => children.iter().all(|c| c.test(alert)),
            Self::Or(children) => children.iter().any(|c| c.test(alert)),
            Self::Not(inner) => !inner.test(alert),
        }
    }

    /// Checks every field reference in the tree.
    ///
    /// Parsed conditions are always valid; this is for trees built by hand.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field, or an error for an empty `And`/`Or`.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Equal { field, .. }
            | Self::NotEqual { field, .. }
            | Self::Match { field, .. }
            | Self::NotMatch { field, .. }
            | Self::Has { field } => field.validate(),
            Self::And(children) | Self::Or(children) => {
                if children.is_empty() {
                    return Err(CoreError::parse(
                        &self.to_string(),
                        0,
                        "conjunction or disjunction without operands",
                    ));
                }
                children.iter().try_for_each(Self::validate)
            }
            Self::Not(inner) => inner.validate(),
        }
    }

    /// Returns every field the condition reads.
    #[must_use]
    pub fn fields(&self) -> Vec<&FieldRef> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldRef>) {
        match self {
            Self::Equal { field, .. }
            | Self::NotEqual { field, .. }
            | Self::Match { field, .. }
            | Self::NotMatch { field, .. }
            | Self::Has { field } => out.push(field),
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Self::Not(inner) => inner.collect_fields(out),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| CoreError::InvalidRegex {
        pattern: pattern.to_string(),
        source,
    })
}

/// Writes `value` as a string literal the lexer reads back unchanged.
fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    let quote = ['\'', '"', '`']
        .into_iter()
        .find(|q| !value.contains(*q))
        .unwrap_or('\'');
    let escaped = value.replace(quote, &format!("\\{quote}"));
    write!(f, "{quote}{escaped}{quote}")
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Condition], op: &str) -> fmt::Result {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, " {op} ")?;
        }
        write!(f, "({child})")?;
    }
    Ok(())
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal { field, value } => {
                write!(f, "{field} == ")?;
                write_quoted(f, value)
            }
            Self::NotEqual { field, value } => {
                write!(f, "{field} != ")?;
                write_quoted(f, value)
            }
            Self::Match { field, regex } => {
                write!(f, "{field} =~ ")?;
                write_quoted(f, regex.as_str())
            }
            Self::NotMatch { field, regex } => {
                write!(f, "{field} !~ ")?;
                write_quoted(f, regex.as_str())
            }
            Self::Has { field } => write!(f, "has {field}"),
            Self::And(children) => write_joined(f, children, "and"),
            Self::Or(children) => write_joined(f, children, "or"),
            Self::Not(inner) => write!(f, "!({inner})"),
        }
    }
}
