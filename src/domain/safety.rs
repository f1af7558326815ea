use serde::{Deserialize, Serialize};

/// Escalating risk classification. The guard reports the maximum severity
/// observed across all executed layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyAction {
    Allowed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyReport {
    pub risk_level: RiskLevel,
    pub action_taken: SafetyAction,
    pub blocked_patterns: Vec<String>,
    pub issues: Vec<String>,
}

impl SafetyReport {
    pub fn safe() -> Self {
        Self {
            risk_level: RiskLevel::Safe,
            action_taken: SafetyAction::Allowed,
            blocked_patterns: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.action_taken == SafetyAction::Blocked
    }

    /// Raise the recorded risk, never lower it.
    pub fn escalate(&mut self, level: RiskLevel) {
        if level > self.risk_level {
            self.risk_level = level;
        }
        if self.risk_level >= RiskLevel::High {
            self.action_taken = SafetyAction::Blocked;
        }
    }
}
