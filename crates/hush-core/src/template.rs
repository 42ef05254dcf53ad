//! Value templates for transform actions.
//!
//! A template is literal text with `{{ ... }}` placeholders. A placeholder
//! holds either a field reference (`{{ labels[host] }}`, `{{ severity_text }}`)
//! or the name of a regex capture (`{{ service }}`). Names that match an alert
//! field are always read from the alert. Missing values render as the empty
//! string.

use std::collections::HashMap;
use std::fmt;

use crate::error::{CoreError, Result};
use crate::field::{FieldKind, FieldRef};
use crate::types::Alert;

/// Named values captured by regex actions during one rule pass.
pub type Captures = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Text(String),
    Field(FieldRef),
    Capture(String),
}

/// A parsed value template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Parses `text`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] for an unclosed or empty placeholder or
    /// a malformed capture name, and [`CoreError::InvalidField`] for a field
    /// placeholder that fails validation.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = Vec::new();
        let mut rest = text;
        let mut offset = 0;
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                parts.push(Part::Text(rest[..open].to_string()));
            }
            let inner_start = open + 2;
            let Some(len) = rest[inner_start..].find("}}") else {
                return Err(CoreError::parse(text, offset + open, "unclosed '{{'"));
            };
            let inner = &rest[inner_start..inner_start + len];
            parts.push(placeholder(text, offset + inner_start, inner)?);
            let consumed = inner_start + len + 2;
            rest = &rest[consumed..];
            offset += consumed;
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }
        Ok(Self {
            source: text.to_string(),
            parts,
        })
    }

    /// Returns the text itself when the template has no placeholders.
    #[must_use]
    pub fn as_literal(&self) -> Option<&str> {
        self.parts
            .iter()
            .all(|p| matches!(p, Part::Text(_)))
            .then_some(self.source.as_str())
    }

    /// Renders the template against `alert` and `captures`.
    #[must_use]
    pub fn render(&self, alert: &Alert, captures: &Captures) -> String {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Field(field) => {
                    if let Some(value) = field.get(alert) {
                        out.push_str(&value);
                    }
                }
                Part::Capture(name) => {
                    if let Some(value) = captures.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

fn placeholder(text: &str, offset: usize, inner: &str) -> Result<Part> {
    let name = inner.trim();
    if name.is_empty() {
        return Err(CoreError::parse(text, offset, "empty placeholder"));
    }
    let base = name.split('[').next().unwrap_or(name);
    if name.contains('[') || FieldKind::from_name(base).is_some() {
        return FieldRef::parse(name).map(Part::Field);
    }
    let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(CoreError::parse(text, offset, "invalid capture name"));
    }
    Ok(Part::Capture(name.to_string()))
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
