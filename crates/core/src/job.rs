//! Video generation job model and lifecycle rules.
//!
//! A job moves forward through `queued -> downloading -> processing ->
//! completed`, and may drop into `failed` or `cancelled` from any
//! non-terminal state. Upload jobs skip `downloading` because their inputs
//! are staged before the job is created.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::source;
use crate::types::{JobId, Timestamp};

/// Upper bound on `targetDuration` (24 hours).
pub const MAX_TARGET_DURATION_SECS: f64 = 86_400.0;

/// Progress value reported once a job has finished successfully.
pub const PROGRESS_COMPLETE: u8 = 100;

/// Lifecycle status of a job, serialized as a lowercase string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal jobs never change status again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the job currently holds an encoder slot.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Downloading | JobStatus::Processing)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Downloading | Processing | Failed | Cancelled) => true,
            (Downloading, Processing | Failed | Cancelled) => true,
            (Processing, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the job's inputs reached the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobSource {
    Urls,
    Upload,
}

/// In-memory job record.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub source: JobSource,
    pub audio_count: usize,
    pub target_duration_secs: Option<f64>,
    /// Rendered video, set only on completion.
    pub video_path: Option<PathBuf>,
    /// Failure message, set only when the job failed.
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// When the job reached a terminal status.
    pub completed_at: Option<Timestamp>,
}

impl Job {
    /// Create a fresh job in `queued` status with zero progress.
    pub fn new(source: JobSource, audio_count: usize, target_duration_secs: Option<f64>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: JobId::new_v4(),
            status: JobStatus::Queued,
            progress: 0,
            source,
            audio_count,
            target_duration_secs,
            video_path: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// File name offered to clients when downloading the result.
    pub fn download_filename(&self) -> String {
        format!("video_{}.mp4", self.id)
    }
}

/// Public JSON view of a job. The on-disk video path stays private; a
/// download URL is exposed instead once the job has completed.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub source: JobSource,
    pub audio_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        let download_url =
            (job.status == JobStatus::Completed).then(|| format!("/download/{}", job.id));
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            source: job.source,
            audio_count: job.audio_count,
            target_duration: job.target_duration_secs,
            error: job.error.clone(),
            download_url,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

/// JSON body of `POST /generate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub audio_urls: Vec<String>,
    pub image_url: String,
    #[serde(default)]
    pub target_duration: Option<f64>,
}

impl GenerateRequest {
    /// Check URLs and the optional target duration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.audio_urls.is_empty() {
            return Err(CoreError::Validation(
                "At least one audio URL is required".to_string(),
            ));
        }
        for url in &self.audio_urls {
            source::validate_source_url(url)?;
        }
        source::validate_source_url(&self.image_url)?;
        validate_target_duration(self.target_duration)
    }
}

/// A target duration, when given, must be a positive finite number of
/// seconds no larger than [`MAX_TARGET_DURATION_SECS`].
pub fn validate_target_duration(secs: Option<f64>) -> Result<(), CoreError> {
    match secs {
        None => Ok(()),
        Some(d) if d.is_finite() && d > 0.0 && d <= MAX_TARGET_DURATION_SECS => Ok(()),
        Some(d) => Err(CoreError::Validation(format!(
            "targetDuration must be between 0 and {MAX_TARGET_DURATION_SECS} seconds, got {d}"
        ))),
    }
}
