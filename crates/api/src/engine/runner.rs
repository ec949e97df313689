//! Job runner: owns the encode slots and the per-job cancellation tokens.
//!
//! Each submitted job gets its own Tokio task. The task waits in `queued`
//! until one of `max_concurrent_jobs` semaphore permits frees up, then runs
//! the [`pipeline`](crate::engine::pipeline). Whatever goes wrong inside is
//! caught at the top of the task and written to the job record; there is
//! no automatic retry.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use vidgen_core::error::CoreError;
use vidgen_core::ffmpeg::FfmpegTools;
use vidgen_core::job::Job;
use vidgen_core::types::JobId;

use crate::config::ServerConfig;
use crate::engine::pipeline::{self, JobInputs, PipelineContext, PipelineError};
use crate::store::JobStore;

pub struct JobRunner {
    store: Arc<JobStore>,
    tools: FfmpegTools,
    work_dir: PathBuf,
    http: reqwest::Client,
    max_download_bytes: u64,
    permits: Arc<Semaphore>,
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl JobRunner {
    /// Build a runner from server configuration.
    pub fn new(config: &ServerConfig, store: Arc<JobStore>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(config.download_timeout())
            .build()?;

        Ok(Self {
            store,
            tools: config.ffmpeg.clone(),
            work_dir: config.work_dir.clone(),
            http,
            max_download_bytes: config.max_download_bytes,
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            tokens: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn tools(&self) -> &FfmpegTools {
        &self.tools
    }

    /// Working directory for one job.
    pub fn job_dir(&self, job_id: JobId) -> PathBuf {
        self.work_dir.join(job_id.to_string())
    }

    /// Register `job` and start working on it in the background.
    pub async fn submit(self: &Arc<Self>, job: Job, inputs: JobInputs) -> Job {
        let job = self.store.insert(job).await;
        let token = self.shutdown.child_token();
        self.tokens.lock().await.insert(job.id, token.clone());

        let runner = Arc::clone(self);
        let job_id = job.id;
        let target = job.target_duration_secs;
        self.tracker.spawn(async move {
            runner.run(job_id, inputs, target, token).await;
        });

        tracing::info!(
            job_id = %job.id,
            source = ?job.source,
            audio_count = job.audio_count,
            "Job queued",
        );
        job
    }

    /// Cancel a job. The record is marked `cancelled` immediately and any
    /// running ffmpeg child is killed.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job, CoreError> {
        let job = self.store.cancel(job_id).await?;
        if let Some(token) = self.tokens.lock().await.get(&job_id) {
            token.cancel();
        }
        tracing::info!(%job_id, "Job cancelled");
        Ok(job)
    }

    /// Stop accepting work, cancel every outstanding job, and wait up to
    /// `timeout` for their tasks to finish.
    pub async fn shutdown(&self, timeout: Duration) {
        let outstanding = self.tracker.len();
        tracing::info!(outstanding, "Cancelling outstanding jobs");
        self.tracker.close();
        self.shutdown.cancel();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Timed out waiting for jobs to stop",
            );
        }
    }

    /// Body of a job task. Never returns an error: every outcome ends up
    /// on the job record.
    async fn run(
        &self,
        job_id: JobId,
        inputs: JobInputs,
        target_duration: Option<f64>,
        token: CancellationToken,
    ) {
        let job_dir = self.job_dir(job_id);

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };

        let result = match permit {
            None => Err(PipelineError::Cancelled),
            Some(_permit) => {
                let ctx = PipelineContext {
                    store: &self.store,
                    tools: &self.tools,
                    http: &self.http,
                    max_download_bytes: self.max_download_bytes,
                };
                AssertUnwindSafe(pipeline::execute(
                    &ctx,
                    job_id,
                    &job_dir,
                    inputs,
                    target_duration,
                    &token,
                ))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(panic.as_ref()))))
            }
        };

        match result {
            Ok(video_path) => match self.store.complete(job_id, video_path).await {
                Ok(_) => tracing::info!(%job_id, "Job completed"),
                Err(e) => {
                    // Cancelled while the last ffmpeg run was finishing.
                    tracing::warn!(%job_id, error = %e, "Could not mark job completed");
                    remove_job_dir(&job_dir).await;
                }
            },
            Err(e) if e.is_cancelled() || token.is_cancelled() => {
                if let Err(e) = self.store.cancel(job_id).await {
                    tracing::debug!(%job_id, error = %e, "Job already marked cancelled");
                }
                tracing::info!(%job_id, "Job stopped after cancellation");
                remove_job_dir(&job_dir).await;
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(%job_id, error = %message, "Job failed");
                remove_job_dir(&job_dir).await;
                if let Err(e) = self.store.fail(job_id, message).await {
                    tracing::warn!(%job_id, error = %e, "Could not mark job failed");
                }
            }
        }

        self.tokens.lock().await.remove(&job_id);
    }
}

/// Delete a job's working directory, ignoring a directory that was never
/// created.
pub async fn remove_job_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove job directory");
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
