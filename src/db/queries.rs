use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{ErrorClass, Job, JobStatus, LogEntry, LogLevel};

const JOB_COLUMNS: &str = r#"
    id, verification_ref, url, status, organization_name, subject_name,
    subject_email, error_class, error_message, redirect_url,
    document_svg IS NOT NULL AS has_document, caller_id,
    created_at, updated_at, settled_at
"#;

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status_str: String = row.try_get("status")?;

    Ok(Job {
        id: row.try_get("id")?,
        verification_ref: row.try_get("verification_ref")?,
        url: row.try_get("url")?,
        status: status_str.parse().unwrap_or(JobStatus::Pending),
        organization_name: row.try_get("organization_name")?,
        subject_name: row.try_get("subject_name")?,
        subject_email: row.try_get("subject_email")?,
        error_class: row.try_get("error_class")?,
        error_message: row.try_get("error_message")?,
        redirect_url: row.try_get("redirect_url")?,
        caller_id: row.try_get("caller_id")?,
        has_document: row.try_get("has_document")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        settled_at: row.try_get("settled_at")?,
    })
}

/// Insert a new verification job in `pending` state.
///
/// The partial unique index on `verification_ref` rejects a second live job
/// for the same verification session; callers surface that as a conflict.
pub async fn create_job(
    pool: &PgPool,
    verification_ref: &str,
    url: &str,
    caller_id: Option<&str>,
) -> Result<Job, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO verification_jobs (verification_ref, url, caller_id)
        VALUES ($1, $2, $3)
        RETURNING {JOB_COLUMNS}
        "#,
    ))
    .bind(verification_ref)
    .bind(url)
    .bind(caller_id)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM verification_jobs
        WHERE id = $1
        "#,
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// List jobs, newest first, optionally filtered by status.
pub async fn list_jobs(
    pool: &PgPool,
    status: Option<JobStatus>,
    limit: i64,
) -> Result<Vec<Job>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM verification_jobs
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    ))
    .bind(status.map(|s| s.to_string()))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Claim a pending job for processing: `pending -> running`.
///
/// Returns false if the job is gone or already past `pending`, in which case
/// the engine must not touch it.
pub async fn claim_job(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE verification_jobs
        SET status = 'running', updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Current status of a job, or None if the record was deleted.
///
/// The engine polls this at suspension points to detect operator cancellation.
pub async fn job_status(pool: &PgPool, job_id: Uuid) -> Result<Option<JobStatus>, sqlx::Error> {
    let row = sqlx::query("SELECT status FROM verification_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    Ok(row
        .map(|r| r.try_get::<String, _>("status"))
        .transpose()?
        .map(|s| s.parse().unwrap_or(JobStatus::Pending)))
}

/// Record the organization and subject resolved during the warmup phase.
pub async fn set_job_context(
    pool: &PgPool,
    job_id: Uuid,
    organization_name: &str,
    subject_name: &str,
    subject_email: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE verification_jobs
        SET organization_name = $2, subject_name = $3, subject_email = $4,
            updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(organization_name)
    .bind(subject_name)
    .bind(subject_email)
    .execute(pool)
    .await?;

    Ok(())
}

/// Settle a running job to a terminal status: `running -> {success|failed|review}`.
///
/// The `status = 'running'` guard makes settlement exactly-once: a retried
/// settlement affects zero rows and the caller skips counter updates. Returns
/// whether this call performed the transition.
#[allow(clippy::too_many_arguments)]
pub async fn settle_job(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    error_class: Option<ErrorClass>,
    error_message: Option<&str>,
    redirect_url: Option<&str>,
    document_svg: Option<&str>,
) -> Result<bool, sqlx::Error> {
    debug_assert!(status.is_terminal());

    let result = sqlx::query(
        r#"
        UPDATE verification_jobs
        SET status = $2, error_class = $3, error_message = $4,
            redirect_url = $5, document_svg = $6,
            settled_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(status.to_string())
    .bind(error_class.map(|c| c.to_string()))
    .bind(error_message)
    .bind(redirect_url)
    .bind(document_svg)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Delete a job record (operator action). A running job notices at its next
/// suspension point and abandons remaining phases.
pub async fn delete_job(pool: &PgPool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM verification_jobs WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Fetch the rendered document artifact for a job, if any.
pub async fn get_document(pool: &PgPool, job_id: Uuid) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT document_svg FROM verification_jobs WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.try_get("document_svg")).transpose()?.flatten())
}

/// Append one entry to a job's log stream. Entries are never updated or
/// reordered after this insert.
pub async fn append_log(
    pool: &PgPool,
    job_id: Uuid,
    level: LogLevel,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_logs (job_id, level, message)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(job_id)
    .bind(level.to_string())
    .bind(message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Log entries for a job in chronological (storage) order.
pub async fn logs_for_job(pool: &PgPool, job_id: Uuid) -> Result<Vec<LogEntry>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, job_id, level, message, created_at
        FROM job_logs
        WHERE job_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let level_str: String = r.try_get("level")?;
            Ok(LogEntry {
                id: r.try_get("id")?,
                job_id: r.try_get("job_id")?,
                level: level_str.parse().unwrap_or(LogLevel::Info),
                message: r.try_get("message")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .collect()
}

/// True when the unique-violation came from the live-job-per-ref index.
pub fn is_duplicate_live_job(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
