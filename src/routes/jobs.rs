use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::{Job, JobStatus, LogEntry};
use crate::models::proxy::ProxyRole;
use crate::routes::{api_error, ApiError};
use crate::services::link::parse_verification_link;
use crate::services::queue::QueuedJob;
use crate::services::verify_client::VerificationService;

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[garde(length(min = 1, max = 2048))]
    pub url: String,

    /// Credit-metered caller on whose behalf this job runs.
    #[garde(length(max = 128))]
    pub caller_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// POST /api/v1/jobs — validate a verification link and enqueue a job for it.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), (StatusCode, Json<ApiError>)> {
    req.validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    // Static validation happens before any record exists; malformed input
    // never becomes a pending job.
    let link = parse_verification_link(&req.url, &state.config.verify_domain)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    if let Some(caller) = req.caller_id.as_deref() {
        let sufficient = state
            .ledger
            .sufficient_balance(caller)
            .await
            .map_err(|e| api_error(StatusCode::BAD_GATEWAY, format!("ledger check failed: {e}")))?;
        if !sufficient {
            return Err(api_error(
                StatusCode::PAYMENT_REQUIRED,
                "insufficient balance",
            ));
        }
    }

    let job = queries::create_job(
        &state.db,
        &link.session_ref,
        &req.url,
        req.caller_id.as_deref(),
    )
    .await
    .map_err(|e| {
        if queries::is_duplicate_live_job(&e) {
            api_error(
                StatusCode::CONFLICT,
                "a job for this verification session is already live",
            )
        } else {
            tracing::error!(error = %e, "failed to create job");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to create job")
        }
    })?;

    let queued = QueuedJob {
        job_id: job.id,
        url: req.url.clone(),
        verification_ref: link.session_ref.clone(),
        caller_id: req.caller_id.clone(),
    };

    if let Err(e) = state.queue.enqueue(&queued).await {
        // Roll the record back rather than leaking a pending job nothing will
        // ever claim.
        tracing::error!(job_id = %job.id, error = %e, "failed to enqueue job, rolling back");
        let _ = queries::delete_job(&state.db, job.id).await;
        return Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to enqueue job",
        ));
    }

    if let Ok(depth) = state.queue.queue_depth().await {
        metrics::gauge!("verification_queue_depth").set(depth as f64);
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckLinkRequest {
    #[garde(length(min = 1, max = 2048))]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct CheckLinkResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/v1/jobs/check — dry-run validation plus a live probe of the
/// session's current protocol step. Never creates a job.
pub async fn check_link(
    State(state): State<AppState>,
    Json(req): Json<CheckLinkRequest>,
) -> Json<CheckLinkResponse> {
    if let Err(e) = req.validate() {
        return Json(CheckLinkResponse {
            valid: false,
            step: None,
            error: Some(e.to_string()),
        });
    }

    let link = match parse_verification_link(&req.url, &state.config.verify_domain) {
        Ok(link) => link,
        Err(e) => {
            return Json(CheckLinkResponse {
                valid: false,
                step: None,
                error: Some(e.to_string()),
            })
        }
    };

    // Probe through a warmup proxy when one is available; a thin pool falls
    // back to a direct probe rather than failing the dry run.
    let proxy = state.proxies.acquire(ProxyRole::Warmup);
    let probed = state.verifier.probe_step(proxy.as_ref(), &link).await;
    if let Some(proxy) = proxy {
        state.proxies.release(proxy.id);
    }

    match probed {
        Ok(step) => Json(CheckLinkResponse {
            valid: true,
            step: Some(step),
            error: None,
        }),
        Err(e) => Json(CheckLinkResponse {
            valid: false,
            step: None,
            error: Some(e.to_string()),
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

/// GET /api/v1/jobs — newest first, optional status filter.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, (StatusCode, Json<ApiError>)> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let jobs = queries::list_jobs(&state.db, query.status, limit)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to list jobs");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list jobs")
        })?;

    Ok(Json(jobs))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, (StatusCode, Json<ApiError>)> {
    let job = queries::get_job(&state.db, job_id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "failed to fetch job");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch job")
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "job not found"))?;

    Ok(Json(job))
}

/// GET /api/v1/jobs/{job_id}/logs — chronological storage order; the
/// dashboard reverses for display.
pub async fn job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Vec<LogEntry>>, (StatusCode, Json<ApiError>)> {
    if queries::get_job(&state.db, job_id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "failed to fetch job");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch job")
        })?
        .is_none()
    {
        return Err(api_error(StatusCode::NOT_FOUND, "job not found"));
    }

    let logs = queries::logs_for_job(&state.db, job_id).await.map_err(|e| {
        tracing::error!(job_id = %job_id, error = %e, "failed to fetch job logs");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch logs")
    })?;

    Ok(Json(logs))
}

/// GET /api/v1/jobs/{job_id}/document — the rendered artifact, as SVG.
pub async fn job_document(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let svg = queries::get_document(&state.db, job_id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "failed to fetch document");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch document")
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no document for this job"))?;

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

/// DELETE /api/v1/jobs/{job_id} — operator delete. A running job notices at
/// its next suspension point and abandons without further writes.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let deleted = queries::delete_job(&state.db, job_id).await.map_err(|e| {
        tracing::error!(job_id = %job_id, error = %e, "failed to delete job");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete job")
    })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "job not found"))
    }
}
