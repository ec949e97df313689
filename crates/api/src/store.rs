//! Process-local job registry.
//!
//! Jobs live only in memory; a restart forgets them. All status changes go
//! through [`JobStore`] so the lifecycle rules in
//! [`JobStatus::can_transition_to`] are enforced in one place.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;
use vidgen_core::error::CoreError;
use vidgen_core::job::{Job, JobStatus, PROGRESS_COMPLETE};
use vidgen_core::types::{JobId, Timestamp};

/// Thread-safe map of job id to job record.
///
/// Designed to be wrapped in `Arc` and shared between handlers and the
/// job runner.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job and return a copy of it.
    pub async fn insert(&self, job: Job) -> Job {
        let copy = job.clone();
        self.jobs.write().await.insert(job.id, job);
        copy
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Move a job to `next`, rejecting illegal lifecycle steps with
    /// [`CoreError::Conflict`].
    pub async fn transition(&self, id: JobId, next: JobStatus) -> Result<Job, CoreError> {
        self.update(id, |job| apply_status(job, next)).await
    }

    /// Raise the progress of a running job. Lower values and updates to
    /// terminal jobs are ignored. Returns whether the record changed.
    pub async fn set_progress(&self, id: JobId, percent: u8) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(&id) else {
            return false;
        };
        let percent = percent.min(PROGRESS_COMPLETE - 1);
        if job.status.is_terminal() || percent <= job.progress {
            return false;
        }
        job.progress = percent;
        job.updated_at = chrono::Utc::now();
        true
    }

    /// Mark a job completed with its rendered video.
    pub async fn complete(&self, id: JobId, video_path: PathBuf) -> Result<Job, CoreError> {
        self.update(id, |job| {
            apply_status(job, JobStatus::Completed)?;
            job.progress = PROGRESS_COMPLETE;
            job.video_path = Some(video_path);
            Ok(())
        })
        .await
    }

    /// Mark a job failed, keeping the error message on the record.
    pub async fn fail(&self, id: JobId, error: impl Into<String>) -> Result<Job, CoreError> {
        let error = error.into();
        self.update(id, |job| {
            apply_status(job, JobStatus::Failed)?;
            job.error = Some(error);
            Ok(())
        })
        .await
    }

    pub async fn cancel(&self, id: JobId) -> Result<Job, CoreError> {
        self.transition(id, JobStatus::Cancelled).await
    }

    pub async fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .count()
    }

    /// Number of jobs currently downloading or encoding.
    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| j.status.is_active())
            .count()
    }

    /// Evict terminal jobs that finished before `cutoff` and return them so
    /// the caller can delete their files.
    pub async fn remove_finished_before(&self, cutoff: Timestamp) -> Vec<Job> {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.completed_at.is_some_and(|t| t < cutoff))
            .map(|j| j.id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| jobs.remove(&id))
            .collect()
    }

    async fn update<F>(&self, id: JobId, f: F) -> Result<Job, CoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), CoreError>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or_else(|| CoreError::NotFound {
            entity: "Job",
            id: id.to_string(),
        })?;
        f(job)?;
        Ok(job.clone())
    }
}

/// Apply a status change in place, stamping `updated_at` and, for terminal
/// statuses, `completed_at`.
fn apply_status(job: &mut Job, next: JobStatus) -> Result<(), CoreError> {
    if !job.status.can_transition_to(next) {
        return Err(CoreError::Conflict(format!(
            "Job is {} and cannot move to {next}",
            job.status
        )));
    }
    let now = chrono::Utc::now();
    job.status = next;
    job.updated_at = now;
    if next.is_terminal() {
        job.completed_at = Some(now);
    }
    Ok(())
}
