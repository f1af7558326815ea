//! Layered static validation of one candidate artifact: syntax, semantic
//! markers, logic checks, safety screen. Each layer is gated by the previous
//! one; any syntax error ends validation immediately with score 0.

use crate::application::use_cases::safety_guard::SafetyGuard;
use crate::domain::safety::RiskLevel;
use crate::domain::validation::{Finding, Severity, ValidationLevel, ValidationVerdict};
use crate::shared::py_ast;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

const SEMANTIC_PENALTY: i32 = 30;
const LOGIC_PENALTY: i32 = 20;

static REQUIRED_DECORATORS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("@allure.feature", r"@allure\.feature\s*\("),
        ("@allure.story", r"@allure\.story\s*\("),
        ("@allure.title", r"@allure\.title\s*\("),
        ("@allure.tag", r"@allure\.tag\s*\("),
    ]
    .iter()
    .map(|(name, pattern)| (*name, Regex::new(pattern).expect("Invalid decorator pattern")))
    .collect()
});

static ASSERTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(assert\s+|expect\()").expect("Invalid assertion pattern"));

static DOCSTRING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"("""|''')"#).expect("Invalid docstring pattern"));

pub struct Validator {
    safety: SafetyGuard,
}

impl Validator {
    pub fn new(safety: SafetyGuard) -> Self {
        Self { safety }
    }

    pub async fn validate(&self, source: &str, level: ValidationLevel) -> ValidationVerdict {
        let mut verdict = ValidationVerdict {
            passed: true,
            score: 100,
            findings: Vec::new(),
            recommendations: Vec::new(),
        };

        let tree = match py_ast::parse(source) {
            Some(tree) => tree,
            None => {
                verdict.passed = false;
                verdict.score = 0;
                verdict
                    .findings
                    .push(Finding::new(Severity::SyntaxError, "Parser returned no tree"));
                return verdict;
            }
        };

        if py_ast::has_syntax_error(&tree) {
            verdict.passed = false;
            verdict.score = 0;
            let finding = match py_ast::first_error_line(&tree) {
                Some(line) => Finding::at_line(Severity::SyntaxError, "SyntaxError: invalid syntax", line),
                None => Finding::new(Severity::SyntaxError, "SyntaxError: invalid syntax"),
            };
            warn!(line = ?finding.line, "Syntax validation failed");
            verdict.findings.push(finding);
            return verdict;
        }

        if level == ValidationLevel::Syntax {
            return verdict;
        }

        let semantic = self.semantic_findings(source);
        let semantic_errors = count_errors(&semantic, Severity::SemanticError);
        verdict.findings.extend(semantic);
        if semantic_errors > 0 {
            verdict.passed = false;
            verdict.score -= SEMANTIC_PENALTY;
        }

        if level == ValidationLevel::Semantic {
            finish(&mut verdict);
            return verdict;
        }

        let logic = logic_findings(&tree, source);
        let logic_errors = count_errors(&logic, Severity::LogicError);
        verdict.findings.extend(logic);
        if logic_errors > 0 {
            verdict.passed = false;
            verdict.score -= LOGIC_PENALTY;
        }

        let safety = self.safety.validate(source).await;
        for issue in &safety.issues {
            verdict
                .findings
                .push(Finding::new(Severity::SafetyIssue, issue.clone()));
        }
        for pattern in &safety.blocked_patterns {
            verdict
                .findings
                .push(Finding::new(Severity::SafetyIssue, pattern.clone()));
        }
        if safety.risk_level >= RiskLevel::High {
            warn!(risk = safety.risk_level.as_str(), "Safety risk detected");
            verdict.passed = false;
            verdict.score = 0;
        }

        finish(&mut verdict);
        debug!(
            passed = verdict.passed,
            score = verdict.score,
            findings = verdict.findings.len(),
            "Validation completed"
        );
        verdict
    }

    /// Missing identification decorators and assertions are warnings, never
    /// hard failures: upstream generation is expected to usually comply, and
    /// a test missing a tag can still run.
    fn semantic_findings(&self, source: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        let missing: Vec<&str> = REQUIRED_DECORATORS
            .iter()
            .filter(|(_, pattern)| !pattern.is_match(source))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            findings.push(Finding::new(
                Severity::Warning,
                format!("Missing decorators: {}", missing.join(", ")),
            ));
        }

        let is_manual = source.contains("allure.manual");
        if !is_manual {
            if !source.contains("with allure.step") {
                findings.push(Finding::new(
                    Severity::Warning,
                    "Consider using allure.step() to structure the test",
                ));
            }
            if !ASSERTION_PATTERN.is_match(source) {
                findings.push(Finding::new(
                    Severity::Warning,
                    "Automated test should contain at least one assertion",
                ));
            }
        } else if !DOCSTRING_PATTERN.is_match(source) && !source.contains("pass") {
            findings.push(Finding::new(
                Severity::Warning,
                "Manual test should describe its steps in a docstring",
            ));
        }

        findings
    }
}

fn logic_findings(tree: &tree_sitter::Tree, source: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    for line in py_ast::unbounded_loops(tree, source) {
        findings.push(Finding::at_line(
            Severity::LogicError,
            "while True loop without break",
            line,
        ));
    }
    if py_ast::attribute_calls(tree, source)
        .iter()
        .any(|call| call == "time.sleep")
    {
        findings.push(Finding::new(
            Severity::Warning,
            "time.sleep() is discouraged, use explicit waits",
        ));
    }
    findings
}

fn count_errors(findings: &[Finding], severity: Severity) -> usize {
    findings.iter().filter(|f| f.severity == severity).count()
}

fn finish(verdict: &mut ValidationVerdict) {
    verdict.score = verdict.score.clamp(0, 100);
    verdict.recommendations = verdict
        .findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .map(|f| f.message.clone())
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::safety_guard::SafetyGuardConfig;

    fn validator() -> Validator {
        Validator::new(SafetyGuard::new(SafetyGuardConfig::default()))
    }

    #[tokio::test]
    async fn test_syntax_error_forces_zero_score() {
        let verdict = validator()
            .validate("def broken(:\n    pass", ValidationLevel::Full)
            .await;
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0);
        assert!(verdict.has_syntax_error());
    }

    #[tokio::test]
    async fn test_syntax_level_skips_semantic_checks() {
        // Valid code with zero decorators passes cleanly at syntax level.
        let verdict = validator()
            .validate("def test_a():\n    pass\n", ValidationLevel::Syntax)
            .await;
        assert!(verdict.passed);
        assert_eq!(verdict.score, 100);
        assert!(verdict.findings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_decorators_are_warnings_only() {
        let verdict = validator()
            .validate(
                "def test_a():\n    assert 1 == 1\n",
                ValidationLevel::Semantic,
            )
            .await;
        assert!(verdict.passed);
        assert!(verdict.count(Severity::Warning) > 0);
        assert!(!verdict.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_loop_is_hard_error() {
        let source = "def test_a():\n    while True:\n        poll()\n";
        let verdict = validator().validate(source, ValidationLevel::Full).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.count(Severity::LogicError), 1);
        assert!(verdict.score <= 80);
    }

    #[tokio::test]
    async fn test_time_sleep_is_warning() {
        let source = "import time\n\ndef test_a():\n    time.sleep(1)\n    assert True\n";
        let verdict = validator().validate(source, ValidationLevel::Full).await;
        assert!(verdict.passed);
        assert!(verdict
            .findings
            .iter()
            .any(|f| f.severity == Severity::Warning && f.message.contains("time.sleep")));
    }

    #[tokio::test]
    async fn test_dangerous_code_fails_at_full_level() {
        let source = "import os\n\ndef test_a():\n    os.system('ls')\n";
        let verdict = validator().validate(source, ValidationLevel::Full).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0);
        assert!(verdict.count(Severity::SafetyIssue) > 0);
    }
}
