//! Runtime settings, layered lowest-to-highest: built-in defaults, an
//! optional `testforge.toml`, then `TESTFORGE_`-prefixed environment
//! variables (with `.env` loaded first).

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub llm: LLMConfig,
    /// Node.js reconnaissance script; reconnaissance degrades to an error
    /// structure when unset.
    pub recon_script_path: Option<PathBuf>,
    pub recon_timeout_secs: u64,
    pub max_retries: i64,
    pub similarity_threshold: f32,
    /// When true, a job whose artifacts all fail to persist still completes,
    /// carrying a diagnostic error message. When false it fails instead.
    pub soft_fail_on_empty: bool,
    pub safety_llm_analysis_enabled: bool,
    pub safety_sandbox_enabled: bool,
    pub rate_limit_per_minute: f64,
    pub rate_limit_burst: f64,
    /// Jira instance for defect analysis; the feature is off when unset.
    pub jira_base_url: Option<String>,
    pub jira_token: Option<String>,
    /// Jobs stuck in a non-terminal state longer than this are swept to
    /// `failed` by the reaper.
    pub stale_job_minutes: i64,
    pub keepalive_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://testforge.db".to_string(),
            llm: LLMConfig::default(),
            recon_script_path: None,
            recon_timeout_secs: 90,
            max_retries: 3,
            similarity_threshold: 0.85,
            soft_fail_on_empty: true,
            safety_llm_analysis_enabled: false,
            safety_sandbox_enabled: false,
            rate_limit_per_minute: 60.0,
            rate_limit_burst: 10.0,
            jira_base_url: None,
            jira_token: None,
            stale_job_minutes: 30,
            keepalive_secs: 30,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("testforge.toml"))
            .merge(Env::prefixed("TESTFORGE_").split("__"))
            .extract()
            .map_err(|e| AppError::ParseError(format!("Failed to load settings: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_retries, 3);
        assert!((settings.similarity_threshold - 0.85).abs() < 1e-6);
        assert!(settings.soft_fail_on_empty);
        assert!(!settings.safety_sandbox_enabled);
    }

    #[test]
    fn test_env_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TESTFORGE_MAX_RETRIES", "5");
            jail.set_env("TESTFORGE_LLM__MODEL", "other-model");
            let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
                .merge(Env::prefixed("TESTFORGE_").split("__"))
                .extract()
                .expect("settings");
            assert_eq!(settings.max_retries, 5);
            assert_eq!(settings.llm.model, "other-model");
            Ok(())
        });
    }
}
