pub mod jobs;
pub mod upload;

use serde::Serialize;
use vidgen_core::job::{Job, JobStatus};
use vidgen_core::types::JobId;

use crate::error::{AppError, AppResult};

/// Message returned when a job has been accepted.
pub const SUBMITTED_MESSAGE: &str = "Video generation started";

/// Response body of `POST /generate` and `POST /upload`.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: &'static str,
}

impl From<&Job> for SubmitResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            message: SUBMITTED_MESSAGE,
        }
    }
}

/// Parse a job id path segment. Ids that are not UUIDs cannot name a job,
/// so they are reported as not found.
pub(crate) fn parse_job_id(raw: &str) -> AppResult<JobId> {
    JobId::parse_str(raw).map_err(|_| AppError::job_not_found(raw))
}
