use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{
    models::{
        CleanupResponse, DeleteResponse, JobAcceptedResponse, JobFilesResponse, JobListResponse,
        ListQuery, MetricsResponse, SubmitRequest,
    },
    state::AppState,
};
use crate::api::error::ApiError;
use crate::jobs::JobStatus;

pub const IDEMPOTENCY_HEADER: &str = "X-Seedbox-Idempotency-Key";

const STREAM_CHUNK: usize = 64 * 1024;

/// Job submission endpoint (POST /jobs)
///
/// ## Flow:
/// 1. Validate Content-Type (JSON only)
/// 2. Read the body, enforce the configured size limit
/// 3. Deserialize `{"locator": ...}`
/// 4. Hand over to the service: idempotency check, locator validation,
///    record creation and scheduling
/// 5. Return 202 Accepted with the job id
///
/// ## Idempotency:
/// If `X-Seedbox-Idempotency-Key` matches an earlier submission whose job
/// still exists, that job is returned and nothing new is scheduled.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let max_size = state.config.server.api.max_payload_bytes.as_u64() as usize;
    let body_bytes = read_body(body, max_size).await?;
    let request: SubmitRequest = serde_json::from_slice(&body_bytes)?;

    let submission = state.service.submit(&request.locator, idempotency_key)?;
    let response = JobAcceptedResponse::new(&submission.job, submission.created);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Reads request body and validates size
///
/// Decompression is handled by `RequestDecompressionLayer`, so the limit
/// applies to the decompressed payload.
async fn read_body(body: Body, max_size: usize) -> Result<Bytes, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::InvalidPayload(err.to_string()))?
        .to_bytes();

    super::utils::validate_body_size(&data, max_size)?;
    Ok(data)
}

fn parse_status(raw: &str) -> Result<JobStatus, ApiError> {
    raw.parse().map_err(ApiError::InvalidPayload)
}

/// Job listing (GET /jobs?status=...), newest first, with per-status counts
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;

    let response = JobListResponse {
        jobs: state.service.list_jobs(status)?,
        counts: state.service.stats()?,
    };
    Ok(Json(response))
}

/// Job status endpoint (GET /jobs/{job_id})
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_status(&job_id)?))
}

/// POST /jobs/{job_id}/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.service.request_pause(&job_id)?;
    Ok(Json(crate::jobs::JobSnapshot::from(&job)))
}

/// POST /jobs/{job_id}/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.service.request_resume(&job_id)?;
    Ok(Json(crate::jobs::JobSnapshot::from(&job)))
}

/// POST /jobs/{job_id}/restart
pub async fn restart_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.service.request_restart(&job_id)?;
    Ok(Json(crate::jobs::JobSnapshot::from(&job)))
}

/// DELETE /jobs/{job_id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.service.request_delete(&job_id).await?;
    Ok(Json(DeleteResponse {
        job_id: report.job_id,
        deleted: true,
        artifacts_removed: report.removed_paths.len(),
    }))
}

/// Payload file listing of a completed job (GET /jobs/{job_id}/files)
pub async fn list_job_files(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let files = state.service.list_files(&job_id).await?;
    Ok(Json(JobFilesResponse { job_id, files }))
}

/// Artifact download (GET /jobs/{job_id}/artifact)
///
/// Single-file jobs stream the file itself; multi-file jobs stream the
/// archive, building it first if needed.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state.service.fetch_artifact(&job_id).await?;

    let file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|err| ApiError::ArtifactUnavailable(format!("cannot open artifact: {err}")))?;

    debug!(job_id, path = %artifact.path.display(), size = artifact.size, "Streaming artifact");

    let stream = futures_util::stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; STREAM_CHUNK];
        let read = file.read(&mut buf).await?;
        if read == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(read);
        Ok(Some((Bytes::from(buf), file)))
    });

    let content_type = if artifact.is_archive {
        HeaderValue::from_static("application/zip")
    } else {
        HeaderValue::from_static("application/octet-stream")
    };

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(artifact.size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        super::utils::content_disposition(&artifact.filename),
    );

    Ok(response)
}

/// Bulk cleanup (POST /operators/cleanup/{status}), `completed` or `failed`
pub async fn cleanup_jobs(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = parse_status(&status)?;
    let removed = state.service.cleanup(status).await?;
    Ok(Json(CleanupResponse { status, removed }))
}

/// Counter snapshot (GET /operators/metrics)
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(MetricsResponse {
        counters: state.service.metrics().snapshot(),
        jobs: state.service.stats()?,
        active_runs: state.service.scheduler().active_count(),
    }))
}

/// Health check endpoint (GET /health)
///
/// Reports the API itself, the ledger (a stats scan must succeed) and the
/// download directory. Returns 503 if any component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let ledger = match state.service.store().stats() {
        Ok(_) => "healthy".to_string(),
        Err(err) => format!("unhealthy: {err}"),
    };
    components.insert("fjall".to_string(), ledger);

    let download_dir = &state.config.downloads.download_dir;
    let downloads = match tokio::fs::metadata(download_dir).await {
        Ok(meta) if meta.is_dir() => "healthy".to_string(),
        _ => format!("unhealthy: {} is not a directory", download_dir.display()),
    };
    components.insert("downloads".to_string(), downloads);

    let all_healthy = components.values().all(|status| status == "healthy");
    let (overall_status, status_code) = if all_healthy {
        ("healthy", StatusCode::OK)
    } else {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    };

    let response = super::models::HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
