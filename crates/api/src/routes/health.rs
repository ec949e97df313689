use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use vidgen_core::job::JobStatus;

use crate::state::AppState;

/// Name reported by `/health`.
pub const SERVICE_NAME: &str = "video-generator-api";

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `healthy`, or `degraded` when ffmpeg cannot be executed.
    pub status: &'static str,
    pub service: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Jobs downloading inputs or encoding.
    pub active_jobs: usize,
    /// Jobs waiting for an encode slot.
    pub queued_jobs: usize,
    pub ffmpeg_available: bool,
}

/// GET /health -- returns service health and job counts.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let ffmpeg_available = state.runner.tools().is_available().await;
    let status = if ffmpeg_available { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status,
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        active_jobs: state.store.active_count().await,
        queued_jobs: state.store.count_by_status(JobStatus::Queued).await,
        ffmpeg_available,
    })
}

/// Mount health check routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
