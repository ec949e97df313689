//! Route definitions for video generation jobs.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{jobs, upload};
use crate::state::AppState;

/// Job routes.
///
/// ```text
/// POST   /generate               -> generate
/// POST   /upload                 -> upload
/// GET    /status/{job_id}        -> get_status
/// GET    /download/{job_id}      -> download
/// GET    /jobs                   -> list_jobs
/// POST   /jobs/{job_id}/cancel   -> cancel_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(jobs::generate))
        .route("/upload", post(upload::upload))
        .route("/status/{job_id}", get(jobs::get_status))
        .route("/download/{job_id}", get(jobs::download))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{job_id}/cancel", post(jobs::cancel_job))
}
