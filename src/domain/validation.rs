use serde::{Deserialize, Serialize};

/// How deep the validator should go. Each level includes everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Syntax,
    Semantic,
    Full,
}

/// Severity ordering: syntax > semantic > logic > safety > warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    SafetyIssue,
    LogicError,
    SemanticError,
    SyntaxError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
    pub line: Option<usize>,
}

impl Finding {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(severity: Severity, message: impl Into<String>, line: usize) -> Self {
        Self {
            severity,
            message: message.into(),
            line: Some(line),
        }
    }
}

/// Composite verdict for one artifact. Any syntax error forces score 0 and
/// `passed == false` no matter what the other layers report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub passed: bool,
    pub score: i32,
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
}

impl ValidationVerdict {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn has_syntax_error(&self) -> bool {
        self.count(Severity::SyntaxError) > 0
    }
}
