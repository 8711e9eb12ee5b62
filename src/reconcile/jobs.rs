// archivetool/src/reconcile/jobs.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

/// Lifecycle states of a reconciliation job. Jobs are never deleted; a
/// terminal `Error` row is the durable record of a failed ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    GettingS3List,
    Staged,
    GeneratingReports,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::GettingS3List => "getting S3 list",
            JobStatus::Staged => "staged",
            JobStatus::GeneratingReports => "generating reports",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub orca_archive_location: String,
    pub status: String,
    pub inventory_creation_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Creates a reconciliation job row and returns its id.
pub async fn create_job(
    pool: &Pool<Postgres>,
    archive_location: &str,
    inventory_creation_time: Option<DateTime<Utc>>,
) -> Result<i64> {
    let now = Utc::now();
    let job_id: i64 = sqlx::query_scalar(
        "INSERT INTO reconcile_job \
         (orca_archive_location, status, inventory_creation_time, start_time, last_update) \
         VALUES ($1, $2, $3, $4, $4) RETURNING id",
    )
    .bind(archive_location)
    .bind(JobStatus::GettingS3List.as_str())
    .bind(inventory_creation_time)
    .bind(now)
    .fetch_one(pool)
    .await
    .inspect_err(|e| eprintln!("❌ Failed to create job for {}: {}", archive_location, e))
    .with_context(|| format!("Failed to create reconciliation job for {}", archive_location))?;

    println!("✓ Created reconciliation job {} for {}", job_id, archive_location);
    Ok(job_id)
}

/// Moves a job to a new status, setting `end_time` on terminal states.
pub async fn update_job_status(
    pool: &Pool<Postgres>,
    job_id: i64,
    status: JobStatus,
) -> Result<()> {
    let now = Utc::now();
    let end_time = status.is_terminal().then_some(now);
    sqlx::query(
        "UPDATE reconcile_job SET status = $2, last_update = $3, end_time = $4 WHERE id = $1",
    )
    .bind(job_id)
    .bind(status.as_str())
    .bind(now)
    .bind(end_time)
    .execute(pool)
    .await
    .inspect_err(|e| eprintln!("❌ Failed to update job {}: {}", job_id, e))
    .with_context(|| format!("Failed to set job {} to '{}'", job_id, status.as_str()))?;
    Ok(())
}

/// Terminally fails a job, recording the error text.
pub async fn mark_job_error(
    pool: &Pool<Postgres>,
    job_id: i64,
    error_message: &str,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE reconcile_job SET status = $2, last_update = $3, end_time = $3, \
         error_message = $4 WHERE id = $1",
    )
    .bind(job_id)
    .bind(JobStatus::Error.as_str())
    .bind(now)
    .bind(error_message)
    .execute(pool)
    .await
    .inspect_err(|e| eprintln!("❌ Failed to mark job {} as errored: {}", job_id, e))
    .with_context(|| format!("Failed to mark job {} as errored", job_id))?;
    Ok(())
}

pub async fn get_job(pool: &Pool<Postgres>, job_id: i64) -> Result<Option<JobRecord>> {
    let job = sqlx::query_as::<_, JobRecord>(
        "SELECT id, orca_archive_location, status, inventory_creation_time, \
         start_time, last_update, end_time, error_message \
         FROM reconcile_job WHERE id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await
    .inspect_err(|e| eprintln!("❌ Failed to fetch job {}: {}", job_id, e))
    .with_context(|| format!("Failed to fetch reconciliation job {}", job_id))?;
    Ok(job)
}
