//! Diagnostics reported by checkers

use crate::hir::Span;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
    /// Analysis of the compilation unit was aborted
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// One reported problem, keyed by a stable message key such as `argument.type.incompatible`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub key: String,
    pub severity: Severity,
    pub unit: String,
    pub method: Option<String>,
    pub span: Span,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<String>,
}

impl Diagnostic {
    pub fn error(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            severity: Severity::Error,
            unit: String::new(),
            method: None,
            span: Span::default(),
            message: message.into(),
            expected: None,
            found: None,
        }
    }

    pub fn warning(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(key, message)
        }
    }

    pub fn fatal(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            ..Self::error(key, message)
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn in_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn in_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Attach the expected and found qualifiers of an incompatibility
    pub fn with_types(mut self, expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        self.expected = Some(expected.to_string());
        self.found = Some(found.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }

    /// Render for a terminal; `color` enables ANSI styling
    pub fn render(&self, color: bool) -> String {
        let severity = self.severity.to_string();
        let severity = if !color {
            severity
        } else {
            match self.severity {
                Severity::Fatal | Severity::Error => severity.red().bold().to_string(),
                Severity::Warning => severity.yellow().bold().to_string(),
                Severity::Note => severity.cyan().to_string(),
            }
        };
        let key = if color {
            format!("[{}]", self.key).dimmed().to_string()
        } else {
            format!("[{}]", self.key)
        };

        let mut out = format!("{}:{} - {severity} {key}: {}", self.unit, self.span, self.message);
        if let (Some(expected), Some(found)) = (&self.expected, &self.found) {
            out.push_str(&format!("\n  found   : {found}\n  required: {expected}"));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(false))
    }
}

/// Render a batch of diagnostics, one per paragraph
pub fn render_all(diagnostics: &[Diagnostic], color: bool) -> String {
    diagnostics
        .iter()
        .map(|d| d.render(color))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_diagnostic() -> Diagnostic {
        Diagnostic::error("argument.type.incompatible", "incompatible argument for parameter s of run")
            .in_unit("Shell.java")
            .in_method("Shell.run(String)")
            .at(Span::new(3, 9))
            .with_types("@Untainted", "@Tainted")
    }

    #[test]
    fn test_plain_render() {
        insta::assert_snapshot!(make_diagnostic().render(false), @r###"
        Shell.java:3:9 - error [argument.type.incompatible]: incompatible argument for parameter s of run
          found   : @Tainted
          required: @Untainted
        "###);
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Fatal > Severity::Error);
        assert!(make_diagnostic().is_error());
        assert!(!Diagnostic::warning("k", "m").is_error());
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(Diagnostic::error("return.type.incompatible", "bad")).unwrap();
        assert_eq!(json["severity"], "error");
        assert!(json.get("expected").is_none());
        let back: Diagnostic = serde_json::from_value(json).unwrap();
        assert_eq!(back.key, "return.type.incompatible");
    }
}
