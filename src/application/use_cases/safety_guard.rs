//! Escalating safety screen for generated test code: regex blacklist, AST
//! import/call whitelist, optional LLM adjudication, optional sandboxed
//! execution. Layers short-circuit on the first block; the final risk level
//! is the maximum observed across executed layers.

use crate::domain::llm_config::LLMConfig;
use crate::domain::safety::{RiskLevel, SafetyReport};
use crate::infrastructure::llm_clients::SharedLLMClient;
use crate::infrastructure::sandbox::SandboxRunner;
use crate::shared::hashing::content_hash;
use crate::shared::py_ast;
use crate::shared::ttl_cache::TtlCache;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

const ADJUDICATION_TTL: Duration = Duration::from_secs(86400);

static CRITICAL_BLACKLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\beval\s*\(",
        r"\bexec\s*\(",
        r"\bcompile\s*\(",
        r"\b__import__\s*\(",
        r"\bos\.system\s*\(",
        r"\bos\.popen\s*\(",
        r"\bsubprocess\.",
        r"\bsocket\.",
        r"\bpickle\.loads?\s*\(",
        r"\bsetattr\s*\(",
        r"\bdelattr\s*\(",
        r"\bglobals\s*\(",
        r"\blocals\s*\(",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("Invalid blacklist pattern")
    })
    .collect()
});

static ALLOWED_IMPORTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "pytest",
        "pytest_asyncio",
        "allure",
        "allure_commons",
        "allure_pytest",
        "playwright",
        "selenium",
        "httpx",
        "requests",
        "aiohttp",
        "json",
        "re",
        "datetime",
        "time",
        "uuid",
        "math",
        "random",
        "typing",
        "typing_extensions",
        "dataclasses",
        "enum",
        "collections",
        "functools",
        "itertools",
        "asyncio",
        "logging",
    ]
    .into_iter()
    .collect()
});

const FORBIDDEN_CALLS: &[&str] = &["eval", "exec", "compile", "__import__"];

#[derive(Debug, Clone)]
pub struct SafetyGuardConfig {
    pub llm_analysis_enabled: bool,
    pub sandbox_enabled: bool,
}

impl Default for SafetyGuardConfig {
    fn default() -> Self {
        Self {
            llm_analysis_enabled: false,
            sandbox_enabled: false,
        }
    }
}

pub struct SafetyGuard {
    config: SafetyGuardConfig,
    llm: Option<SharedLLMClient>,
    llm_config: LLMConfig,
    sandbox: Option<SandboxRunner>,
    adjudication_cache: Mutex<TtlCache<bool>>,
}

impl SafetyGuard {
    pub fn new(config: SafetyGuardConfig) -> Self {
        Self {
            config,
            llm: None,
            llm_config: LLMConfig::default(),
            sandbox: None,
            adjudication_cache: Mutex::new(TtlCache::new(512, ADJUDICATION_TTL)),
        }
    }

    pub fn with_llm(mut self, llm: SharedLLMClient, llm_config: LLMConfig) -> Self {
        self.llm = Some(llm);
        self.llm_config = llm_config;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxRunner) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub async fn validate(&self, source: &str) -> SafetyReport {
        let mut report = SafetyReport::safe();

        let blacklisted = self.static_analysis(source);
        if !blacklisted.is_empty() {
            report.blocked_patterns = blacklisted;
            report.escalate(RiskLevel::Critical);
            return report;
        }

        let forbidden = self.ast_analysis(source);
        if !forbidden.is_empty() {
            report.blocked_patterns = forbidden;
            report.escalate(RiskLevel::High);
            return report;
        }

        if self.config.llm_analysis_enabled && report.risk_level <= RiskLevel::Medium {
            if let Some(dangerous) = self.llm_analysis(source).await {
                if dangerous {
                    report
                        .blocked_patterns
                        .push("LLM analysis flagged code as dangerous".to_string());
                    report.escalate(RiskLevel::High);
                    return report;
                }
            }
        }

        if self.config.sandbox_enabled && report.risk_level <= RiskLevel::Medium {
            if let Some(sandbox) = &self.sandbox {
                let outcome = sandbox.execute(source).await;
                if !outcome.blocked.is_empty() {
                    report.blocked_patterns.extend(outcome.blocked);
                    report.escalate(RiskLevel::Critical);
                    return report;
                }
                if !outcome.warnings.is_empty() {
                    report.issues.extend(outcome.warnings);
                    report.escalate(RiskLevel::Medium);
                }
            }
        }

        report
    }

    fn static_analysis(&self, source: &str) -> Vec<String> {
        CRITICAL_BLACKLIST
            .iter()
            .filter(|pattern| pattern.is_match(source))
            .map(|pattern| pattern.as_str().to_string())
            .collect()
    }

    fn ast_analysis(&self, source: &str) -> Vec<String> {
        // Parse failures are the syntax layer's problem, not a safety block.
        let Some(tree) = py_ast::parse(source) else {
            return Vec::new();
        };
        if py_ast::has_syntax_error(&tree) {
            return Vec::new();
        }

        let mut blocked = Vec::new();
        for module in py_ast::imported_modules(&tree, source) {
            if !ALLOWED_IMPORTS.contains(module.as_str()) {
                blocked.push(format!("Forbidden import: {}", module));
            }
        }
        for call in py_ast::called_identifiers(&tree, source) {
            if FORBIDDEN_CALLS.contains(&call.as_str()) {
                blocked.push(format!("Forbidden function call: {}", call));
            }
        }
        blocked
    }

    /// Yes/no adjudication of residual risk, cached per content hash so
    /// repeated screening of the same artifact stays cheap. Returns None when
    /// no client is wired or the call fails.
    async fn llm_analysis(&self, source: &str) -> Option<bool> {
        let llm = self.llm.as_ref()?;
        let key = content_hash(source);
        if let Some(cached) = self.lock_cache().get(&key) {
            debug!("Safety adjudication cache hit");
            return Some(cached);
        }

        let system = "You are a security reviewer for generated test code.";
        let prompt = format!(
            "Does the following Python test code perform anything dangerous \
             (filesystem destruction, network abuse, process control, data exfiltration)? \
             Answer only YES or NO.\n\n{}",
            source
        );

        match llm.generate(&self.llm_config, system, &prompt).await {
            Ok(answer) => {
                let dangerous = answer.to_uppercase().contains("YES");
                self.lock_cache().put(key, dangerous);
                Some(dangerous)
            }
            Err(err) => {
                warn!(error = %err, "Safety LLM analysis failed");
                None
            }
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TtlCache<bool>> {
        match self.adjudication_cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::safety::SafetyAction;

    fn guard() -> SafetyGuard {
        SafetyGuard::new(SafetyGuardConfig::default())
    }

    #[tokio::test]
    async fn test_dynamic_import_is_critical() {
        let report = guard()
            .validate("__import__('os').system('rm -rf /')")
            .await;
        assert_eq!(report.risk_level, RiskLevel::Critical);
        assert_eq!(report.action_taken, SafetyAction::Blocked);
        assert!(!report.blocked_patterns.is_empty());
    }

    #[tokio::test]
    async fn test_subprocess_usage_is_critical() {
        let report = guard()
            .validate("import subprocess\nsubprocess.run(['ls'])")
            .await;
        assert_eq!(report.risk_level, RiskLevel::Critical);
        assert!(report.is_blocked());
    }

    #[tokio::test]
    async fn test_forbidden_import_is_high() {
        let report = guard().validate("import shutil\nshutil.copy('a', 'b')").await;
        assert_eq!(report.risk_level, RiskLevel::High);
        assert!(report.is_blocked());
        assert!(report
            .blocked_patterns
            .iter()
            .any(|p| p.contains("shutil")));
    }

    #[tokio::test]
    async fn test_allowed_imports_are_safe() {
        let source = "import pytest\nimport allure\nfrom playwright.sync_api import Page\n\n\
                      def test_login(page: Page):\n    assert page is not None\n";
        let report = guard().validate(source).await;
        assert_eq!(report.risk_level, RiskLevel::Safe);
        assert!(!report.is_blocked());
    }

    #[tokio::test]
    async fn test_unparseable_code_is_not_blocked_here() {
        let report = guard().validate("def broken(:\n    pass").await;
        assert!(!report.is_blocked());
    }
}
