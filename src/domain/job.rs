use crate::domain::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a generation job. Transitions are owned exclusively
/// by the orchestrator; the only backwards edge is the validation -> generation
/// retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Started,
    Reconnaissance,
    Generation,
    Validation,
    Optimization,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Started => "started",
            JobStatus::Reconnaissance => "reconnaissance",
            JobStatus::Generation => "generation",
            JobStatus::Validation => "validation",
            JobStatus::Optimization => "optimization",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(JobStatus::Pending),
            "started" => Ok(JobStatus::Started),
            "reconnaissance" => Ok(JobStatus::Reconnaissance),
            "generation" => Ok(JobStatus::Generation),
            "validation" => Ok(JobStatus::Validation),
            "optimization" => Ok(JobStatus::Optimization),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(AppError::ParseError(format!("Unknown job status: {}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Manual,
    Automated,
    Both,
    Api,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestType::Manual => "manual",
            TestType::Automated => "automated",
            TestType::Both => "both",
            TestType::Api => "api",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "manual" => Ok(TestType::Manual),
            "automated" => Ok(TestType::Automated),
            "both" => Ok(TestType::Both),
            "api" => Ok(TestType::Api),
            other => Err(AppError::ParseError(format!("Unknown test type: {}", other))),
        }
    }
}

/// Counts attached at the terminal `completed` transition. `tests_saved`
/// reflects persisted rows, never the number merely generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub tests_generated: usize,
    pub tests_validated: usize,
    pub tests_optimized: usize,
    pub tests_saved: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub target: String,
    pub requirements: Vec<String>,
    pub test_type: TestType,
    pub status: JobStatus,
    /// Last completed stage boundary, set before any stage executes so a
    /// crashed job is always resumable.
    pub checkpoint_stage: Option<String>,
    pub retry_count: i64,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result_summary: Option<ResultSummary>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub options: JobOptions,
}

/// Per-job tunables carried alongside the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobOptions {
    pub max_retries: i64,
    pub similarity_threshold: f32,
    pub optimize: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            similarity_threshold: 0.85,
            optimize: true,
        }
    }
}
