//! Handlers for URL-sourced job submission, status, listing, cancellation
//! and download.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_util::io::ReaderStream;
use vidgen_core::error::CoreError;
use vidgen_core::job::{GenerateRequest, Job, JobSource, JobStatus, JobSummary};

use crate::engine::JobInputs;
use crate::error::{AppError, AppResult};
use crate::handlers::{parse_job_id, SubmitResponse};
use crate::state::AppState;

/// Message returned for a `/generate` body that is not a usable request.
pub const MISSING_FIELDS_MESSAGE: &str = "Missing required fields";

/// Message returned when downloading a job that has not completed.
pub const NOT_COMPLETED_MESSAGE: &str = "Job not completed";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_job(state: &AppState, raw_id: &str) -> AppResult<Job> {
    let id = parse_job_id(raw_id)?;
    state
        .store
        .get(id)
        .await
        .ok_or_else(|| AppError::job_not_found(id))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /generate
///
/// Accepts `{"audioUrls": [...], "imageUrl": "...", "targetDuration": n}`
/// and returns 202 with the queued job id. A body that is not JSON or lacks
/// `audioUrls`/`imageUrl` is rejected with `Missing required fields`.
pub async fn generate(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let input: GenerateRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, "Rejected generate request body");
        AppError::BadRequest(MISSING_FIELDS_MESSAGE.to_string())
    })?;
    input.validate()?;

    let job = Job::new(JobSource::Urls, input.audio_urls.len(), input.target_duration);
    let job = state
        .runner
        .submit(
            job,
            JobInputs::Urls {
                audio_urls: input.audio_urls,
                image_url: input.image_url,
            },
        )
        .await;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from(&job))))
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// GET /status/{job_id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobSummary>> {
    let job = find_job(&state, &job_id).await?;
    Ok(Json(JobSummary::from(&job)))
}

/// GET /jobs
///
/// Every job the service still remembers, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    let jobs = state.store.list().await;
    Json(jobs.iter().map(JobSummary::from).collect())
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /jobs/{job_id}/cancel
///
/// Returns 409 if the job already finished.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<JobSummary>> {
    let id = parse_job_id(&job_id)?;
    let job = state.runner.cancel(id).await?;
    Ok(Json(JobSummary::from(&job)))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /download/{job_id}
///
/// Streams the rendered MP4 as an attachment named `video_<job_id>.mp4`.
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Response> {
    let job = find_job(&state, &job_id).await?;
    if job.status != JobStatus::Completed {
        return Err(AppError::BadRequest(NOT_COMPLETED_MESSAGE.to_string()));
    }
    let path = job.video_path.as_deref().ok_or_else(|| {
        AppError::InternalError(format!("Completed job {} has no video path", job.id))
    })?;

    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::Core(CoreError::NotFound {
                entity: "Video file",
                id: job.id.to_string(),
            })
        } else {
            AppError::from(e)
        }
    })?;
    let len = file.metadata().await?.len();

    tracing::info!(job_id = %job.id, bytes = len, "Serving rendered video");

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "video/mp4")
        .header(CONTENT_LENGTH, len)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", job.download_filename()),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::InternalError(e.to_string()))
}
