use crate::domain::artifact::TestCase;
use crate::domain::error::{AppError, Result};
use crate::domain::job::{Job, JobOptions, JobStatus, ResultSummary, TestType};
use sqlx::SqlitePool;
use tracing::{info, warn};

pub struct JobRepository {
    pool: SqlitePool,
}

impl JobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &Job) -> Result<()> {
        let requirements_json = serde_json::to_string(&job.requirements)
            .map_err(|e| AppError::ParseError(format!("Failed to encode requirements: {e}")))?;
        let options_json = serde_json::to_string(&job.options)
            .map_err(|e| AppError::ParseError(format!("Failed to encode options: {e}")))?;

        sqlx::query(
            "INSERT INTO jobs (id, target, requirements_json, test_type, status, checkpoint_stage,
                               options_json, retry_count, created_at, started_at, completed_at,
                               result_summary_json, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)",
        )
        .bind(&job.id)
        .bind(&job.target)
        .bind(&requirements_json)
        .bind(job.test_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.checkpoint_stage)
        .bind(&options_json)
        .bind(job.retry_count)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert job: {e}")))?;

        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Job> {
        let entity = sqlx::query_as::<_, JobEntity>(
            "SELECT id, target, requirements_json, test_type, status, checkpoint_stage,
                    options_json, retry_count, created_at, started_at, completed_at,
                    result_summary_json, error_message
             FROM jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch job: {e}")))?;

        entity
            .map(Job::try_from)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<Job>> {
        let entities = sqlx::query_as::<_, JobEntity>(
            "SELECT id, target, requirements_json, test_type, status, checkpoint_stage,
                    options_json, retry_count, created_at, started_at, completed_at,
                    result_summary_json, error_message
             FROM jobs ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list jobs: {e}")))?;

        entities.into_iter().map(Job::try_from).collect()
    }

    /// Advance a non-terminal job to a new stage status. Returns false when
    /// the job was already terminal; terminal rows are never mutated.
    pub async fn advance_status(&self, job_id: &str, status: JobStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = ?
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(status.as_str())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to update job status: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the checkpoint before a stage runs so a crashed job can resume
    /// at this boundary. The payload carries the stage inputs; stages with
    /// nothing recorded yet pass None.
    pub async fn set_checkpoint(
        &self,
        job_id: &str,
        stage: &str,
        payload_json: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET checkpoint_stage = ?, checkpoint_json = ?
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(stage)
        .bind(payload_json)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to set checkpoint: {e}")))?;
        Ok(())
    }

    /// Stage inputs recorded with the last checkpoint, if any.
    pub async fn checkpoint_payload(&self, job_id: &str) -> Result<Option<String>> {
        let row =
            sqlx::query_scalar::<_, Option<String>>("SELECT checkpoint_json FROM jobs WHERE id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to read checkpoint: {e}")))?;
        Ok(row.flatten())
    }

    pub async fn mark_started(&self, job_id: &str, started_at: i64) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'started', started_at = ?
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(started_at)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to mark job started: {e}")))?;
        Ok(())
    }

    pub async fn increment_retry(&self, job_id: &str) -> Result<i64> {
        sqlx::query("UPDATE jobs SET retry_count = retry_count + 1 WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to increment retry: {e}")))?;

        sqlx::query_scalar::<_, i64>("SELECT retry_count FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to read retry count: {e}")))
    }

    /// Terminal `completed` transition: append the surviving test cases and
    /// update the job row in one transaction so a crash can never leave the
    /// job completed without its rows (or the rows without the status).
    pub async fn complete_with_tests(
        &self,
        job_id: &str,
        test_cases: &[TestCase],
        summary: &ResultSummary,
        error_message: Option<&str>,
        completed_at: i64,
    ) -> Result<()> {
        let summary_json = serde_json::to_string(summary)
            .map_err(|e| AppError::ParseError(format!("Failed to encode summary: {e}")))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {e}")))?;

        for case in test_cases {
            sqlx::query(
                "INSERT INTO test_cases (id, job_id, name, code, test_type, code_hash,
                                         validation_status, priority, tags_json, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&case.id)
            .bind(&case.job_id)
            .bind(&case.name)
            .bind(&case.code)
            .bind(&case.test_type)
            .bind(&case.code_hash)
            .bind(&case.validation_status)
            .bind(&case.priority)
            .bind(&case.tags_json)
            .bind(case.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to insert test case: {e}")))?;
        }

        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = ?,
                             result_summary_json = ?, error_message = ?
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(completed_at)
        .bind(&summary_json)
        .bind(error_message)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to complete job: {e}")))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to rollback: {e}")))?;
            return Err(AppError::ValidationError(format!(
                "Job {} is already terminal",
                job_id
            )));
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit: {e}")))?;

        info!(job_id, saved = test_cases.len(), "Job completed");
        Ok(())
    }

    pub async fn fail(&self, job_id: &str, message: &str, completed_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = ?, completed_at = ?
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(message)
        .bind(completed_at)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fail job: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Sweep jobs stuck in a non-terminal state past the staleness threshold
    /// into `failed` so clients always converge on a terminal status.
    pub async fn fail_stale_jobs(&self, stale_before: i64, now: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed',
                             error_message = 'Job stalled and was reaped',
                             completed_at = ?
             WHERE status NOT IN ('completed', 'failed', 'pending') AND created_at < ?",
        )
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to reap stale jobs: {e}")))?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            warn!(reaped, "Reaped stale jobs");
        }
        Ok(reaped)
    }
}

#[derive(sqlx::FromRow)]
struct JobEntity {
    id: String,
    target: String,
    requirements_json: String,
    test_type: String,
    status: String,
    checkpoint_stage: Option<String>,
    options_json: String,
    retry_count: i64,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    result_summary_json: Option<String>,
    error_message: Option<String>,
}

impl TryFrom<JobEntity> for Job {
    type Error = AppError;

    fn try_from(entity: JobEntity) -> Result<Self> {
        let requirements: Vec<String> = serde_json::from_str(&entity.requirements_json)
            .map_err(|e| AppError::ParseError(format!("Failed to decode requirements: {e}")))?;
        let options: JobOptions = serde_json::from_str(&entity.options_json)
            .map_err(|e| AppError::ParseError(format!("Failed to decode options: {e}")))?;
        let result_summary = entity
            .result_summary_json
            .as_deref()
            .map(serde_json::from_str::<ResultSummary>)
            .transpose()
            .map_err(|e| AppError::ParseError(format!("Failed to decode summary: {e}")))?;

        Ok(Job {
            id: entity.id,
            target: entity.target,
            requirements,
            test_type: TestType::parse(&entity.test_type)?,
            status: JobStatus::parse(&entity.status)?,
            checkpoint_stage: entity.checkpoint_stage,
            retry_count: entity.retry_count,
            created_at: entity.created_at,
            started_at: entity.started_at,
            completed_at: entity.completed_at,
            result_summary,
            error_message: entity.error_message,
            options,
        })
    }
}
