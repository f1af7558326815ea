//! Job pipeline state machine. The orchestrator is the only component that
//! mutates job lifecycle status; validator and optimizer return results that
//! it applies. Stage order is reconnaissance, generation, validation with a
//! bounded retry edge back to generation, optimization, persistence.

pub mod generation;

use crate::application::use_cases::optimizer::{Optimizer, OptimizerOptions};
use crate::application::use_cases::validator::Validator;
use crate::domain::artifact::{GeneratedArtifact, TestCase};
use crate::domain::error::{AppError, Result};
use crate::domain::job::{Job, JobOptions, JobStatus, ResultSummary, TestType};
use crate::domain::llm_config::LLMConfig;
use crate::domain::recon::PageStructure;
use crate::domain::validation::{ValidationLevel, ValidationVerdict};
use crate::infrastructure::db::jobs::JobRepository;
use crate::infrastructure::llm_clients::CachedLLMClient;
use crate::infrastructure::playwright::SharedReconProvider;
use crate::infrastructure::pubsub::{job_topic, EventBus, JobEvent};
use crate::shared::hashing::content_hash;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// Share of artifacts that must pass validation to skip the generation retry.
const RETRY_PASS_RATIO: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub recon_timeout: Duration,
    /// When the pipeline ends with zero persisted tests despite generated
    /// artifacts, complete with a diagnostic message instead of failing.
    pub soft_fail_on_empty: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            recon_timeout: Duration::from_secs(90),
            soft_fail_on_empty: true,
        }
    }
}

/// Pipeline stages in execution order. The checkpoint records the stage
/// about to run together with its inputs, so a resumed job re-enters at
/// that boundary instead of repeating completed work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Reconnaissance,
    Generation,
    Validation,
    Optimization,
    SaveResults,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Reconnaissance => "reconnaissance",
            Stage::Generation => "generation",
            Stage::Validation => "validation",
            Stage::Optimization => "optimization",
            Stage::SaveResults => "save_results",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "reconnaissance" => Some(Stage::Reconnaissance),
            "generation" => Some(Stage::Generation),
            "validation" => Some(Stage::Validation),
            "optimization" => Some(Stage::Optimization),
            "save_results" => Some(Stage::SaveResults),
            _ => None,
        }
    }
}

/// Inputs of a stage boundary, serialized next to the checkpoint stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StageState {
    page: Option<PageStructure>,
    /// Candidates generated but not yet validated.
    pending: Vec<GeneratedArtifact>,
    /// Survivors of validation, carrying their pass/warning outcome.
    checked: Vec<CheckedArtifact>,
    generated_total: usize,
    passed_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckedArtifact {
    artifact: GeneratedArtifact,
    passed: bool,
}

fn encode_state(state: &StageState) -> Result<String> {
    serde_json::to_string(state)
        .map_err(|e| AppError::ParseError(format!("Failed to encode checkpoint: {e}")))
}

pub struct Orchestrator {
    jobs: Arc<JobRepository>,
    recon: SharedReconProvider,
    llm: Arc<CachedLLMClient>,
    llm_config: LLMConfig,
    validator: Arc<Validator>,
    optimizer: Arc<Optimizer>,
    events: Arc<EventBus>,
    config: PipelineConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<JobRepository>,
        recon: SharedReconProvider,
        llm: Arc<CachedLLMClient>,
        llm_config: LLMConfig,
        validator: Arc<Validator>,
        optimizer: Arc<Optimizer>,
        events: Arc<EventBus>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            jobs,
            recon,
            llm,
            llm_config,
            validator,
            optimizer,
            events,
            config,
        }
    }

    /// Create a job in `pending` and return its id. A fresh id is minted per
    /// call; submission is never deduplicated.
    pub async fn submit(
        &self,
        target: &str,
        requirements: Vec<String>,
        test_type: TestType,
        options: JobOptions,
    ) -> Result<String> {
        let requirements: Vec<String> = requirements
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if requirements.is_empty() {
            return Err(AppError::ValidationError(
                "At least one requirement is required".to_string(),
            ));
        }
        if target.starts_with("http") {
            Url::parse(target)
                .map_err(|e| AppError::ValidationError(format!("Invalid target URL: {}", e)))?;
        }

        let job = Job {
            id: Uuid::new_v4().to_string(),
            target: target.to_string(),
            requirements,
            test_type,
            status: JobStatus::Pending,
            checkpoint_stage: None,
            retry_count: 0,
            created_at: Utc::now().timestamp_millis(),
            started_at: None,
            completed_at: None,
            result_summary: None,
            error_message: None,
            options,
        };
        self.jobs.insert(&job).await?;
        info!(job_id = %job.id, target, "Job submitted");
        Ok(job.id)
    }

    pub async fn job(&self, job_id: &str) -> Result<Job> {
        self.jobs.get(job_id).await
    }

    /// Execute the full pipeline for a pending job within the calling worker.
    pub async fn run(&self, job_id: &str) -> Result<()> {
        let job = self.jobs.get(job_id).await?;
        if job.status.is_terminal() {
            return Err(AppError::ValidationError(format!(
                "Job {} is already terminal",
                job_id
            )));
        }

        self.jobs
            .mark_started(job_id, Utc::now().timestamp_millis())
            .await?;
        self.events.publish(
            &job_topic(job_id),
            JobEvent::processing(job_id, "started", "Job started"),
        );
        self.execute(&job, Stage::Reconnaissance, StageState::default())
            .await
    }

    /// Re-enter the pipeline for a job that crashed mid-run. The checkpoint
    /// records the stage about to run and its inputs, so execution picks up
    /// at that boundary; a checkpoint with no readable payload restarts from
    /// the top. Terminal jobs cannot be resumed.
    pub async fn resume(&self, job_id: &str) -> Result<()> {
        let job = self.jobs.get(job_id).await?;
        if job.status == JobStatus::Completed {
            return Err(AppError::ResumeError(format!(
                "Job {} is already completed",
                job_id
            )));
        }
        if job.status == JobStatus::Failed {
            return Err(AppError::ResumeError(format!(
                "Job {} has failed and cannot be resumed",
                job_id
            )));
        }
        let Some(stage_name) = job.checkpoint_stage.clone() else {
            return Err(AppError::ResumeError(format!(
                "Job {} has no checkpoint to resume from",
                job_id
            )));
        };

        let (entry, state) = match self.jobs.checkpoint_payload(job_id).await? {
            Some(payload) => match (
                Stage::parse(&stage_name),
                serde_json::from_str::<StageState>(&payload),
            ) {
                (Some(stage), Ok(state)) => (stage, state),
                _ => {
                    warn!(job_id, checkpoint = %stage_name, "Unreadable checkpoint, restarting");
                    (Stage::Reconnaissance, StageState::default())
                }
            },
            None => (Stage::Reconnaissance, StageState::default()),
        };

        info!(job_id, checkpoint = %stage_name, "Resuming job");
        self.events.publish(
            &job_topic(job_id),
            JobEvent::processing(job_id, "resumed", format!("Resuming from {}", stage_name)),
        );
        self.execute(&job, entry, state).await
    }

    /// Standalone validation of one source text, for callers outside the
    /// pipeline.
    pub async fn validate_code(&self, source: &str, level: ValidationLevel) -> ValidationVerdict {
        self.validator.validate(source, level).await
    }

    async fn execute(&self, job: &Job, entry: Stage, state: StageState) -> Result<()> {
        match self.run_pipeline(job, entry, state).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let message = err.to_string();
                warn!(job_id = %job.id, error = %message, "Pipeline failed");
                self.jobs
                    .fail(&job.id, &message, Utc::now().timestamp_millis())
                    .await?;
                self.publish_terminal(&job.id, "failed", message, None);
                Err(err)
            }
        }
    }

    async fn run_pipeline(&self, job: &Job, entry: Stage, mut state: StageState) -> Result<()> {
        let job_id = job.id.as_str();
        let options = &job.options;

        if entry <= Stage::Reconnaissance {
            self.enter_stage(
                job_id,
                Stage::Reconnaissance,
                JobStatus::Reconnaissance,
                "Analyzing target",
                &state,
            )
            .await?;
            let page = self
                .recon
                .analyze(&job.target, self.config.recon_timeout)
                .await;
            if let Some(error) = &page.error {
                warn!(job_id, error = %error, "Reconnaissance degraded, continuing");
            }
            state.page = Some(page);
        }
        let page = state.page.clone().unwrap_or_else(|| {
            PageStructure::error_structure(&job.target, "No page structure at checkpoint")
        });

        if entry <= Stage::Validation {
            let mut retry_count = job.retry_count;
            // A checkpoint at the validation boundary already carries the
            // generated candidates; validate those before regenerating.
            let mut revalidate = entry == Stage::Validation && !state.pending.is_empty();
            let (checked, passed_count) = loop {
                if !revalidate {
                    self.enter_stage(
                        job_id,
                        Stage::Generation,
                        JobStatus::Generation,
                        "Generating test candidates",
                        &state,
                    )
                    .await?;
                    state.pending = self.generate(job, &page, retry_count).await?;
                    state.generated_total += state.pending.len();
                    self.events.publish(
                        &job_topic(job_id),
                        JobEvent::processing(job_id, "generation", "Candidates generated")
                            .with_count(state.pending.len()),
                    );
                }
                revalidate = false;

                self.enter_stage(
                    job_id,
                    Stage::Validation,
                    JobStatus::Validation,
                    "Validating candidates",
                    &state,
                )
                .await?;
                let artifacts = std::mem::take(&mut state.pending);
                let mut checked: Vec<(GeneratedArtifact, ValidationVerdict)> = Vec::new();
                for artifact in artifacts {
                    let verdict = self
                        .validator
                        .validate(&artifact.source, ValidationLevel::Full)
                        .await;
                    checked.push((artifact, verdict));
                }
                let passed = checked.iter().filter(|(_, v)| v.passed).count();

                // Quality gate, not a correctness guarantee: a low pass rate
                // earns another generation attempt while the budget lasts.
                let pass_rate_low = checked.is_empty()
                    || (passed as f64) / (checked.len() as f64) < RETRY_PASS_RATIO;
                if pass_rate_low && retry_count < options.max_retries {
                    retry_count = self.jobs.increment_retry(job_id).await?;
                    info!(
                        job_id,
                        retry_count,
                        passed,
                        generated = checked.len(),
                        "Low validation pass rate, retrying generation"
                    );
                    self.events.publish(
                        &job_topic(job_id),
                        JobEvent::processing(
                            job_id,
                            "validation",
                            "Pass rate too low, regenerating",
                        )
                        .with_count(passed),
                    );
                    continue;
                }
                break (checked, passed);
            };

            // Artifacts with a syntax error or a blocking safety verdict are
            // dropped here; everything else is persisted, warnings included.
            state.passed_count = passed_count;
            state.checked = checked
                .into_iter()
                .filter(|(_, verdict)| !verdict.has_syntax_error() && verdict.score > 0)
                .map(|(artifact, verdict)| CheckedArtifact {
                    passed: verdict.passed,
                    artifact,
                })
                .collect();
        }

        let mut optimized_count = state.checked.len();
        if entry <= Stage::Optimization && options.optimize && state.checked.len() > 1 {
            self.enter_stage(
                job_id,
                Stage::Optimization,
                JobStatus::Optimization,
                "Removing duplicates",
                &state,
            )
            .await?;
            let artifacts: Vec<GeneratedArtifact> =
                state.checked.iter().map(|c| c.artifact.clone()).collect();
            let report = self
                .optimizer
                .optimize(
                    &artifacts,
                    &job.requirements,
                    &OptimizerOptions {
                        similarity_threshold: options.similarity_threshold,
                    },
                )
                .await?;
            let kept: HashSet<&str> = report.optimized.iter().map(|a| a.id.as_str()).collect();
            state
                .checked
                .retain(|c| kept.contains(c.artifact.id.as_str()));
            optimized_count = state.checked.len();
            self.events.publish(
                &job_topic(job_id),
                JobEvent::processing(job_id, "optimization", "Duplicates removed")
                    .with_count(optimized_count),
            );
        }

        let payload = encode_state(&state)?;
        self.jobs
            .set_checkpoint(job_id, Stage::SaveResults.as_str(), Some(&payload))
            .await?;
        let now = Utc::now().timestamp_millis();
        let cases: Vec<TestCase> = state
            .checked
            .iter()
            .map(|c| TestCase {
                id: c.artifact.id.clone(),
                job_id: job_id.to_string(),
                name: c.artifact.name.clone(),
                code: c.artifact.source.clone(),
                test_type: generation::detect_test_type(&c.artifact.source, job.test_type)
                    .to_string(),
                code_hash: content_hash(&c.artifact.source),
                validation_status: if c.passed { "passed" } else { "warning" }.to_string(),
                priority: None,
                tags_json: None,
                created_at: now,
            })
            .collect();

        let summary = ResultSummary {
            tests_generated: state.generated_total,
            tests_validated: state.passed_count,
            tests_optimized: optimized_count,
            tests_saved: cases.len(),
        };
        let diagnostic = if cases.is_empty() && state.generated_total > 0 {
            Some(format!(
                "Generated {} artifacts but none survived validation",
                state.generated_total
            ))
        } else {
            None
        };
        if let Some(message) = &diagnostic {
            if !self.config.soft_fail_on_empty {
                return Err(AppError::ValidationError(message.clone()));
            }
            warn!(job_id, message = %message, "Completing with zero persisted tests");
        }

        self.jobs
            .complete_with_tests(job_id, &cases, &summary, diagnostic.as_deref(), now)
            .await?;
        self.publish_terminal(
            job_id,
            "completed",
            format!("Saved {} tests", cases.len()),
            Some(cases.len()),
        );
        Ok(())
    }

    async fn generate(
        &self,
        job: &Job,
        page: &PageStructure,
        retry_count: i64,
    ) -> Result<Vec<GeneratedArtifact>> {
        let system = generation::system_prompt(job.test_type);
        let prompt = generation::user_prompt(&job.target, &job.requirements, page, retry_count);
        let response = self.llm.generate(&self.llm_config, &system, &prompt).await?;
        let origin = if retry_count == 0 {
            "generation".to_string()
        } else {
            format!("generation_retry_{}", retry_count)
        };
        Ok(generation::extract_artifacts(&response, &origin))
    }

    /// Checkpoint the stage with its inputs, advance, announce. Refusing to
    /// advance means another actor already moved the job to a terminal state.
    async fn enter_stage(
        &self,
        job_id: &str,
        stage: Stage,
        status: JobStatus,
        message: &str,
        state: &StageState,
    ) -> Result<()> {
        let payload = encode_state(state)?;
        self.jobs
            .set_checkpoint(job_id, stage.as_str(), Some(&payload))
            .await?;
        if !self.jobs.advance_status(job_id, status).await? {
            return Err(AppError::ValidationError(format!(
                "Job {} is already terminal",
                job_id
            )));
        }
        self.events.publish(
            &job_topic(job_id),
            JobEvent::processing(job_id, stage.as_str(), message),
        );
        Ok(())
    }

    fn publish_terminal(&self, job_id: &str, status: &str, message: String, count: Option<usize>) {
        let event = JobEvent {
            job_id: job_id.to_string(),
            stage: "save_results".to_string(),
            status: status.to_string(),
            message,
            tests_count: count,
        };
        self.events.publish(&job_topic(job_id), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::embedding_service::EmbeddingService;
    use crate::application::use_cases::safety_guard::{SafetyGuard, SafetyGuardConfig};
    use crate::infrastructure::db::connection::init_db;
    use crate::infrastructure::llm_clients::LLMClient;
    use crate::infrastructure::playwright::ReconProvider;
    use crate::infrastructure::pubsub::{next_item, StreamItem};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubRecon;

    #[async_trait]
    impl ReconProvider for StubRecon {
        async fn analyze(&self, target: &str, _timeout: Duration) -> PageStructure {
            PageStructure {
                title: "Stub Page".to_string(),
                url: target.to_string(),
                ..Default::default()
            }
        }
    }

    struct CountingRecon {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ReconProvider for CountingRecon {
        async fn analyze(&self, target: &str, _timeout: Duration) -> PageStructure {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PageStructure {
                title: "Stub Page".to_string(),
                url: target.to_string(),
                ..Default::default()
            }
        }
    }

    struct ScriptedClient {
        responses: Mutex<VecDeque<String>>,
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn generate(&self, _: &LLMConfig, _: &str, _: &str) -> Result<String> {
            let mut responses = self.responses.lock().unwrap();
            Ok(responses.pop_front().unwrap_or_default())
        }
    }

    async fn harness(responses: Vec<String>) -> (Orchestrator, Arc<JobRepository>) {
        harness_with_recon(responses, Arc::new(StubRecon)).await
    }

    async fn harness_with_recon(
        responses: Vec<String>,
        recon: SharedReconProvider,
    ) -> (Orchestrator, Arc<JobRepository>) {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let jobs = Arc::new(JobRepository::new(pool));
        let scripted = Arc::new(ScriptedClient {
            responses: Mutex::new(responses.into()),
        });
        let orchestrator = Orchestrator::new(
            Arc::clone(&jobs),
            recon,
            Arc::new(CachedLLMClient::new(scripted)),
            LLMConfig::default(),
            Arc::new(Validator::new(SafetyGuard::new(SafetyGuardConfig::default()))),
            Arc::new(Optimizer::new(Arc::new(EmbeddingService::local_only()))),
            Arc::new(EventBus::new()),
            PipelineConfig::default(),
        );
        (orchestrator, jobs)
    }

    fn good_block(index: usize) -> String {
        format!(
            "```python\ndef test_good_{}():\n    do('step {}')\n    assert True\n```\n",
            index, index
        )
    }

    fn looping_block(index: usize) -> String {
        format!(
            "```python\ndef test_poll_{}():\n    while True:\n        poll()\n```\n",
            index
        )
    }

    fn broken_block(index: usize) -> String {
        format!("```python\ndef broken_{}(:\n    pass\n```\n", index)
    }

    async fn submit(orchestrator: &Orchestrator) -> String {
        orchestrator
            .submit(
                "https://example.com",
                vec!["step".to_string()],
                TestType::Automated,
                JobOptions::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_requirements_rejected_at_submit() {
        let (orchestrator, _) = harness(vec![]).await;
        let result = orchestrator
            .submit(
                "https://example.com",
                vec!["   ".to_string()],
                TestType::Automated,
                JobOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_at_submit() {
        let (orchestrator, _) = harness(vec![]).await;
        let result = orchestrator
            .submit(
                "http://exa mple.com",
                vec!["login".to_string()],
                TestType::Automated,
                JobOptions::default(),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_happy_path_completes_and_persists() {
        let response = (1..=3).map(good_block).collect::<String>();
        let (orchestrator, jobs) = harness(vec![response]).await;
        let job_id = submit(&orchestrator).await;

        orchestrator.run(&job_id).await.unwrap();

        let job = jobs.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
        let summary = job.result_summary.unwrap();
        assert_eq!(summary.tests_generated, 3);
        assert_eq!(summary.tests_validated, 3);
        assert_eq!(summary.tests_saved, 3);
    }

    #[tokio::test]
    async fn test_low_pass_rate_triggers_one_retry() {
        // 3 of 10 pass on the first attempt, all pass on the second.
        let first: String = (1..=3)
            .map(good_block)
            .chain((1..=7).map(looping_block))
            .collect();
        let second: String = (1..=10).map(good_block).collect();
        let (orchestrator, jobs) = harness(vec![first, second]).await;
        let job_id = submit(&orchestrator).await;

        orchestrator.run(&job_id).await.unwrap();

        let job = jobs.get(&job_id).await.unwrap();
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_summary.unwrap().tests_saved, 10);
    }

    #[tokio::test]
    async fn test_all_syntax_errors_still_completes_with_diagnostic() {
        // Initial attempt plus three retries, every artifact unparseable.
        let responses: Vec<String> = (0..4)
            .map(|_| (1..=5).map(broken_block).collect::<String>())
            .collect();
        let (orchestrator, jobs) = harness(responses).await;
        let job_id = submit(&orchestrator).await;

        orchestrator.run(&job_id).await.unwrap();

        let job = jobs.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.retry_count, 3);
        assert!(job.error_message.is_some());
        assert_eq!(job.result_summary.unwrap().tests_saved, 0);
    }

    #[tokio::test]
    async fn test_failed_artifacts_persist_as_warnings() {
        // A looping test fails validation but is not a syntax or safety
        // block, so it is persisted with a warning status.
        let response = format!("{}{}", good_block(1), looping_block(1));
        let (orchestrator, jobs) = harness(vec![response]).await;
        let job_id = submit(&orchestrator).await;

        orchestrator.run(&job_id).await.unwrap();

        let job = jobs.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let summary = job.result_summary.unwrap();
        assert_eq!(summary.tests_validated, 1);
        assert_eq!(summary.tests_saved, 2);
    }

    #[tokio::test]
    async fn test_run_on_terminal_job_is_an_error() {
        let (orchestrator, _) = harness(vec![good_block(1)]).await;
        let job_id = submit(&orchestrator).await;
        orchestrator.run(&job_id).await.unwrap();

        assert!(orchestrator.run(&job_id).await.is_err());
    }

    #[tokio::test]
    async fn test_resume_requires_a_checkpoint() {
        let (orchestrator, _) = harness(vec![]).await;
        let job_id = submit(&orchestrator).await;

        let result = orchestrator.resume(&job_id).await;
        assert!(matches!(result, Err(AppError::ResumeError(_))));
    }

    #[tokio::test]
    async fn test_resume_at_save_results_skips_earlier_stages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recon = Arc::new(CountingRecon {
            calls: Arc::clone(&calls),
        });
        let (orchestrator, jobs) = harness_with_recon(vec![], recon).await;
        let job_id = submit(&orchestrator).await;

        // Crash after optimization: the checkpoint holds the surviving
        // artifacts but the terminal transition never happened.
        let state = StageState {
            checked: vec![CheckedArtifact {
                artifact: GeneratedArtifact {
                    id: "a1".to_string(),
                    name: "test_login".to_string(),
                    source: "def test_login():\n    assert True\n".to_string(),
                    origin: "generation".to_string(),
                    endpoint: None,
                },
                passed: true,
            }],
            generated_total: 1,
            passed_count: 1,
            ..Default::default()
        };
        jobs.set_checkpoint(
            &job_id,
            "save_results",
            Some(&serde_json::to_string(&state).unwrap()),
        )
        .await
        .unwrap();
        jobs.advance_status(&job_id, JobStatus::Optimization)
            .await
            .unwrap();

        orchestrator.resume(&job_id).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let job = jobs.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_summary.unwrap().tests_saved, 1);
    }

    #[tokio::test]
    async fn test_resume_at_generation_reuses_recorded_page() {
        let calls = Arc::new(AtomicUsize::new(0));
        let recon = Arc::new(CountingRecon {
            calls: Arc::clone(&calls),
        });
        let (orchestrator, jobs) = harness_with_recon(vec![good_block(1)], recon).await;
        let job_id = submit(&orchestrator).await;

        let state = StageState {
            page: Some(PageStructure {
                title: "Recorded".to_string(),
                url: "https://example.com".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        jobs.set_checkpoint(
            &job_id,
            "generation",
            Some(&serde_json::to_string(&state).unwrap()),
        )
        .await
        .unwrap();
        jobs.advance_status(&job_id, JobStatus::Reconnaissance)
            .await
            .unwrap();

        orchestrator.resume(&job_id).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let job = jobs.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_summary.unwrap().tests_saved, 1);
    }

    #[tokio::test]
    async fn test_resume_without_payload_restarts_from_the_top() {
        let (orchestrator, jobs) = harness(vec![good_block(1)]).await;
        let job_id = submit(&orchestrator).await;
        jobs.set_checkpoint(&job_id, "validation", None).await.unwrap();
        jobs.advance_status(&job_id, JobStatus::Validation)
            .await
            .unwrap();

        orchestrator.resume(&job_id).await.unwrap();

        let job = jobs.get(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_summary.unwrap().tests_saved, 1);
    }

    #[tokio::test]
    async fn test_resume_rejects_completed_job() {
        let (orchestrator, _) = harness(vec![good_block(1)]).await;
        let job_id = submit(&orchestrator).await;
        orchestrator.run(&job_id).await.unwrap();

        let result = orchestrator.resume(&job_id).await;
        assert!(matches!(result, Err(AppError::ResumeError(_))));
    }

    #[tokio::test]
    async fn test_terminal_event_is_published() {
        let (orchestrator, _) = harness(vec![good_block(1)]).await;
        let job_id = submit(&orchestrator).await;
        let mut receiver = orchestrator.events.subscribe(&job_topic(&job_id));

        orchestrator.run(&job_id).await.unwrap();

        let mut terminal = None;
        while let Some(StreamItem::Event(event)) =
            next_item(&mut receiver, Duration::from_millis(50)).await
        {
            if event.is_terminal() {
                terminal = Some(event);
                break;
            }
        }
        let terminal = terminal.expect("no terminal event");
        assert_eq!(terminal.status, "completed");
        assert_eq!(terminal.tests_count, Some(1));
    }
}
