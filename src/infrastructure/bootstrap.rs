//! Composition root. Collaborators are constructed once from settings and
//! handed to the orchestrator by reference; capability choices (remote vs.
//! local embeddings, sandbox on or off, reconnaissance script present or
//! not) are made here, not at call sites.

use crate::application::use_cases::defect_analysis::DefectAnalysisService;
use crate::application::use_cases::embedding_service::{EmbeddingService, RemoteEmbeddingProvider};
use crate::application::use_cases::optimizer::{OptimizationReport, Optimizer, OptimizerOptions};
use crate::application::use_cases::orchestrator::{Orchestrator, PipelineConfig};
use crate::application::use_cases::rate_limiter::{
    RateLimitConfig, RateLimitDecision, TokenBucketLimiter,
};
use crate::application::use_cases::safety_guard::{SafetyGuard, SafetyGuardConfig};
use crate::application::use_cases::validator::Validator;
use crate::domain::artifact::{GeneratedArtifact, TestCase};
use crate::domain::error::Result;
use crate::domain::job::{Job, JobOptions, TestType};
use crate::domain::recon::PageStructure;
use crate::domain::validation::{ValidationLevel, ValidationVerdict};
use crate::infrastructure::config::Settings;
use crate::infrastructure::db::connection::init_db;
use crate::infrastructure::db::jobs::JobRepository;
use crate::infrastructure::db::test_cases::TestCaseRepository;
use crate::infrastructure::defects::JiraClient;
use crate::infrastructure::llm_clients::{CachedLLMClient, OpenAICompatibleClient};
use crate::infrastructure::playwright::{PlaywrightRecon, ReconProvider, SharedReconProvider};
use crate::infrastructure::pubsub::{job_topic, next_item, EventBus, JobEvent, StreamItem};
use crate::infrastructure::sandbox::{SandboxConfig, SandboxRunner};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Stand-in reconnaissance when no script is configured: the pipeline runs
/// on requirements alone.
struct DisabledRecon;

#[async_trait]
impl ReconProvider for DisabledRecon {
    async fn analyze(&self, target: &str, _timeout: Duration) -> PageStructure {
        PageStructure::error_structure(target, "Reconnaissance is not configured")
    }
}

pub struct AppContext {
    pub settings: Settings,
    pub jobs: Arc<JobRepository>,
    pub test_cases: Arc<TestCaseRepository>,
    pub events: Arc<EventBus>,
    pub rate_limiter: Arc<TokenBucketLimiter>,
    pub defects: Option<DefectAnalysisService>,
    orchestrator: Arc<Orchestrator>,
    optimizer: Arc<Optimizer>,
}

pub async fn build(settings: Settings) -> Result<AppContext> {
    let pool = init_db(&settings.database_url).await?;
    let jobs = Arc::new(JobRepository::new(pool.clone()));
    let test_cases = Arc::new(TestCaseRepository::new(pool));

    let llm = Arc::new(CachedLLMClient::new(Arc::new(OpenAICompatibleClient::new())));
    let raw_llm = Arc::new(OpenAICompatibleClient::new());

    // Remote embeddings need credentials; without them every vector comes
    // from the deterministic local fallback.
    let embeddings = if settings.llm.api_key.is_some() {
        Arc::new(EmbeddingService::new(Arc::new(RemoteEmbeddingProvider::new(
            settings.llm.clone(),
        ))))
    } else {
        info!("No LLM credentials, using local fallback embeddings");
        Arc::new(EmbeddingService::local_only())
    };

    let mut safety = SafetyGuard::new(SafetyGuardConfig {
        llm_analysis_enabled: settings.safety_llm_analysis_enabled,
        sandbox_enabled: settings.safety_sandbox_enabled,
    });
    if settings.safety_llm_analysis_enabled {
        safety = safety.with_llm(raw_llm.clone(), settings.llm.clone());
    }
    if settings.safety_sandbox_enabled {
        safety = safety.with_sandbox(SandboxRunner::new(SandboxConfig::default()));
    }
    let validator = Arc::new(Validator::new(safety));

    let optimizer = Arc::new(
        Optimizer::new(Arc::clone(&embeddings)).with_llm(raw_llm, settings.llm.clone()),
    );

    let recon: SharedReconProvider = match &settings.recon_script_path {
        Some(path) => {
            match PlaywrightRecon::check_nodejs() {
                Ok(version) => info!(version = %version, "Node.js available for reconnaissance"),
                Err(err) => warn!(error = %err, "Node.js missing, reconnaissance will degrade"),
            }
            Arc::new(PlaywrightRecon::new(path.clone()))
        }
        None => Arc::new(DisabledRecon),
    };

    let events = Arc::new(EventBus::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&jobs),
        recon,
        llm,
        settings.llm.clone(),
        validator,
        Arc::clone(&optimizer),
        Arc::clone(&events),
        PipelineConfig {
            recon_timeout: Duration::from_secs(settings.recon_timeout_secs),
            soft_fail_on_empty: settings.soft_fail_on_empty,
        },
    ));

    let rate_limiter = Arc::new(TokenBucketLimiter::new(RateLimitConfig {
        requests_per_minute: settings.rate_limit_per_minute,
        burst: settings.rate_limit_burst,
    }));

    let defects = settings.jira_base_url.as_ref().map(|base_url| {
        DefectAnalysisService::new(Arc::new(JiraClient::new(
            base_url.clone(),
            settings.jira_token.clone(),
        )))
    });

    Ok(AppContext {
        settings,
        jobs,
        test_cases,
        events,
        rate_limiter,
        defects,
        orchestrator,
        optimizer,
    })
}

impl AppContext {
    /// Submit a job. Callers without per-job tunables pass None and get
    /// defaults derived from the settings.
    pub async fn submit_job(
        &self,
        target: &str,
        requirements: Vec<String>,
        test_type: TestType,
        options: Option<JobOptions>,
    ) -> Result<String> {
        let options = options.unwrap_or_else(|| JobOptions {
            max_retries: self.settings.max_retries,
            similarity_threshold: self.settings.similarity_threshold,
            ..JobOptions::default()
        });
        self.orchestrator
            .submit(target, requirements, test_type, options)
            .await
    }

    pub async fn run_job(&self, job_id: &str) -> Result<()> {
        self.orchestrator.run(job_id).await
    }

    pub async fn resume_job(&self, job_id: &str) -> Result<()> {
        self.orchestrator.resume(job_id).await
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<Job> {
        self.orchestrator.job(job_id).await
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<Job>> {
        self.jobs.list(limit).await
    }

    pub async fn get_test_case(&self, test_id: &str) -> Result<TestCase> {
        self.test_cases.get(test_id).await
    }

    pub async fn job_tests(&self, job_id: &str) -> Result<Vec<TestCase>> {
        self.test_cases.list_for_job(job_id).await
    }

    pub async fn validate_code(&self, source: &str, level: ValidationLevel) -> ValidationVerdict {
        self.orchestrator.validate_code(source, level).await
    }

    pub async fn optimize_tests(
        &self,
        artifacts: &[GeneratedArtifact],
        requirements: &[String],
    ) -> Result<OptimizationReport> {
        self.optimizer
            .optimize(
                artifacts,
                requirements,
                &OptimizerOptions {
                    similarity_threshold: self.settings.similarity_threshold,
                },
            )
            .await
    }

    pub fn subscribe(&self, job_id: &str) -> tokio::sync::broadcast::Receiver<JobEvent> {
        self.events.subscribe(&job_topic(job_id))
    }

    /// Next item on a subscription, emitting a keep-alive after the
    /// configured idle window.
    pub async fn next_event(
        &self,
        receiver: &mut tokio::sync::broadcast::Receiver<JobEvent>,
    ) -> Option<StreamItem> {
        next_item(receiver, Duration::from_secs(self.settings.keepalive_secs)).await
    }

    pub fn check_rate_limit(&self, client_id: &str) -> RateLimitDecision {
        self.rate_limiter.try_acquire(client_id)
    }
}

/// Background maintenance: sweep jobs stuck past the staleness threshold into
/// `failed` so clients always converge on a terminal status, and drop idle
/// rate-limit buckets.
pub fn spawn_maintenance(
    jobs: Arc<JobRepository>,
    rate_limiter: Arc<TokenBucketLimiter>,
    stale_minutes: i64,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let now = Utc::now().timestamp_millis();
            let stale_before = now - stale_minutes * 60_000;
            if let Err(err) = jobs.fail_stale_jobs(stale_before, now).await {
                warn!(error = %err, "Stale job sweep failed");
            }
            rate_limiter.cleanup();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        Settings {
            database_url: "sqlite::memory:".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_build_wires_a_working_context() {
        let context = build(test_settings()).await.unwrap();
        assert!(context.defects.is_none());

        let job_id = context
            .submit_job(
                "https://example.com",
                vec!["login".to_string()],
                TestType::Automated,
                None,
            )
            .await
            .unwrap();
        let job = context.get_job_status(&job_id).await.unwrap();
        assert_eq!(job.target, "https://example.com");
    }

    #[tokio::test]
    async fn test_submit_defaults_come_from_settings() {
        let settings = Settings {
            max_retries: 1,
            similarity_threshold: 0.9,
            ..test_settings()
        };
        let context = build(settings).await.unwrap();
        let job_id = context
            .submit_job(
                "https://example.com",
                vec!["login".to_string()],
                TestType::Automated,
                None,
            )
            .await
            .unwrap();

        let job = context.get_job_status(&job_id).await.unwrap();
        assert_eq!(job.options.max_retries, 1);
        assert!((job.options.similarity_threshold - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_next_event_delivers_published_events() {
        let context = build(test_settings()).await.unwrap();
        let mut receiver = context.subscribe("j1");
        context
            .events
            .publish(&job_topic("j1"), JobEvent::processing("j1", "generation", "working"));

        match context.next_event(&mut receiver).await {
            Some(StreamItem::Event(event)) => assert_eq!(event.stage, "generation"),
            other => panic!("expected an event, got something else: {}", other.is_some()),
        }
    }

    #[tokio::test]
    async fn test_validate_code_through_the_facade() {
        let context = build(test_settings()).await.unwrap();
        let verdict = context
            .validate_code("def broken(:\n    pass", ValidationLevel::Full)
            .await;
        assert!(!verdict.passed);
        assert_eq!(verdict.score, 0);
    }

    #[tokio::test]
    async fn test_jira_settings_enable_defect_analysis() {
        let settings = Settings {
            jira_base_url: Some("https://jira.example.com".to_string()),
            ..test_settings()
        };
        let context = build(settings).await.unwrap();
        assert!(context.defects.is_some());
    }
}
