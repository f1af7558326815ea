use crate::domain::artifact::TestCase;
use crate::domain::error::{AppError, Result};
use sqlx::SqlitePool;

pub struct TestCaseRepository {
    pool: SqlitePool,
}

impl TestCaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<TestCase>> {
        let cases = sqlx::query_as::<_, TestCaseEntity>(
            "SELECT id, job_id, name, code, test_type, code_hash, validation_status,
                    priority, tags_json, created_at
             FROM test_cases WHERE job_id = ? ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list test cases: {e}")))?;

        Ok(cases.into_iter().map(|case| case.into()).collect())
    }

    pub async fn count_for_job(&self, job_id: &str) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM test_cases WHERE job_id = ?")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count test cases: {e}")))
    }

    pub async fn get(&self, test_id: &str) -> Result<TestCase> {
        let case = sqlx::query_as::<_, TestCaseEntity>(
            "SELECT id, job_id, name, code, test_type, code_hash, validation_status,
                    priority, tags_json, created_at
             FROM test_cases WHERE id = ?",
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch test case: {e}")))?;

        case.map(|entity| entity.into())
            .ok_or_else(|| AppError::NotFound(format!("Test case {} not found", test_id)))
    }
}

#[derive(sqlx::FromRow)]
struct TestCaseEntity {
    id: String,
    job_id: String,
    name: String,
    code: String,
    test_type: String,
    code_hash: String,
    validation_status: String,
    priority: Option<String>,
    tags_json: Option<String>,
    created_at: i64,
}

impl From<TestCaseEntity> for TestCase {
    fn from(entity: TestCaseEntity) -> Self {
        Self {
            id: entity.id,
            job_id: entity.job_id,
            name: entity.name,
            code: entity.code,
            test_type: entity.test_type,
            code_hash: entity.code_hash,
            validation_status: entity.validation_status,
            priority: entity.priority,
            tags_json: entity.tags_json,
            created_at: entity.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{Job, JobOptions, JobStatus, ResultSummary, TestType};
    use crate::infrastructure::db::connection::init_db;
    use crate::infrastructure::db::jobs::JobRepository;

    fn case(id: &str, job_id: &str, created_at: i64) -> TestCase {
        TestCase {
            id: id.to_string(),
            job_id: job_id.to_string(),
            name: format!("test_{}", id),
            code: "def test_login(): pass".to_string(),
            test_type: "automated".to_string(),
            code_hash: "hash".to_string(),
            validation_status: "passed".to_string(),
            priority: None,
            tags_json: None,
            created_at,
        }
    }

    async fn seeded_repo() -> TestCaseRepository {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let jobs = JobRepository::new(pool.clone());
        let job = Job {
            id: "j1".to_string(),
            target: "https://example.com".to_string(),
            requirements: vec!["login".to_string()],
            test_type: TestType::Automated,
            status: JobStatus::Pending,
            checkpoint_stage: None,
            retry_count: 0,
            created_at: 1_000,
            started_at: None,
            completed_at: None,
            result_summary: None,
            error_message: None,
            options: JobOptions::default(),
        };
        jobs.insert(&job).await.unwrap();
        jobs.complete_with_tests(
            "j1",
            &[case("t1", "j1", 2_000), case("t2", "j1", 3_000)],
            &ResultSummary::default(),
            None,
            4_000,
        )
        .await
        .unwrap();
        TestCaseRepository::new(pool)
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_creation() {
        let repo = seeded_repo().await;
        let cases = repo.list_for_job("j1").await.unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id, "t1");
        assert_eq!(cases[1].id, "t2");
        assert!(repo.list_for_job("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_and_get() {
        let repo = seeded_repo().await;
        assert_eq!(repo.count_for_job("j1").await.unwrap(), 2);
        assert_eq!(repo.get("t1").await.unwrap().name, "test_t1");
        assert!(repo.get("missing").await.is_err());
    }
}
