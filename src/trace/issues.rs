//! Code review issues decoded through the same recovery ladder as frames.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decoder::{string_field, DecodeTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    #[default]
    Warning,
    Info,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "critical" | "high" => Some(Severity::Error),
            "warning" | "warn" | "medium" => Some(Severity::Warning),
            "info" | "hint" | "note" | "low" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(f, "{s}")
    }
}

/// A single problem the oracle found in the learner's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIssue {
    /// 1-based line number
    pub line: u32,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub suggestion: String,
}

impl DecodeTarget for CodeIssue {
    const ARRAY_FIELDS: &'static [&'static str] = &["issues", "problems", "diagnostics"];

    fn from_element(value: &Value, _position: usize) -> Option<Self> {
        value.as_object()?;

        let line = value
            .get("line")
            .and_then(|v| match v {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(1);

        let severity = string_field(value, &["severity", "level", "type"])
            .and_then(|s| Severity::parse(&s))
            .unwrap_or_default();

        Some(CodeIssue {
            line,
            severity,
            message: string_field(value, &["message", "description", "issue"]).unwrap_or_default(),
            suggestion: string_field(value, &["suggestion", "fix"]).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::decoder::{DecodeOutcome, Decoder};

    #[test]
    fn test_issues_field_with_defaults() {
        let text = r#"{"issues":[{"line":3,"severity":"error","message":"off by one"},{"message":"unused"}]}"#;
        let issues = Decoder::default()
            .decode::<CodeIssue>(text)
            .into_result()
            .unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].line, 3);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[1].line, 1);
        assert_eq!(issues[1].severity, Severity::Warning);
        assert_eq!(issues[1].suggestion, "");
    }

    #[test]
    fn test_line_as_string() {
        let text = r#"[{"line":"12","severity":"low","message":"style"}]"#;
        let issues = Decoder::default()
            .decode::<CodeIssue>(text)
            .into_result()
            .unwrap();
        assert_eq!(issues[0].line, 12);
        assert_eq!(issues[0].severity, Severity::Info);
    }

    #[test]
    fn test_no_issues_prose() {
        let outcome = Decoder::default().decode::<CodeIssue>("No issues found. Nice work!");
        assert_eq!(outcome, DecodeOutcome::Empty);
    }
}
