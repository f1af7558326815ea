use crate::domain::error::{AppError, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

/// Connect and apply the schema. Accepts any sqlite URL, including
/// `sqlite::memory:` for tests.
pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::DatabaseError(format!("Failed to parse database URL: {e}")))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

    apply_schema(&pool).await?;
    Ok(pool)
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            target TEXT NOT NULL,
            requirements_json TEXT NOT NULL,
            test_type TEXT NOT NULL,
            status TEXT NOT NULL,
            checkpoint_stage TEXT,
            checkpoint_json TEXT,
            options_json TEXT NOT NULL DEFAULT '{}',
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            result_summary_json TEXT,
            error_message TEXT
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| AppError::DatabaseError(format!("Failed to create jobs table: {e}")))?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS test_cases (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(id),
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            test_type TEXT NOT NULL,
            code_hash TEXT NOT NULL,
            validation_status TEXT NOT NULL,
            priority TEXT,
            tags_json TEXT,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| AppError::DatabaseError(format!("Failed to create test_cases table: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_test_cases_job ON test_cases(job_id)")
        .execute(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create index: {e}")))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create index: {e}")))?;

    Ok(())
}
