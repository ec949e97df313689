//! Periodic eviction of finished jobs.
//!
//! Jobs that reached a terminal status more than `job_retention_secs` ago
//! are dropped from the store and their working directories deleted, so
//! neither memory nor disk grows without bound.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::engine::runner::{remove_job_dir, JobRunner};

/// Run the retention sweep loop until `cancel` is triggered.
pub async fn run(
    runner: Arc<JobRunner>,
    retention: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = sweep_interval.as_secs(),
        "Job retention sweep started"
    );

    let mut interval = tokio::time::interval(sweep_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention sweep stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = sweep_once(&runner, retention).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Job retention: evicted finished jobs");
                } else {
                    tracing::debug!("Job retention: nothing to evict");
                }
            }
        }
    }
}

/// Evict every job that finished before `now - retention` and delete its
/// files. Returns the number of evicted jobs.
pub async fn sweep_once(runner: &JobRunner, retention: Duration) -> usize {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(retention)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    let expired = runner.store().remove_finished_before(cutoff).await;
    for job in &expired {
        remove_job_dir(&runner.job_dir(job.id)).await;
        tracing::debug!(job_id = %job.id, status = %job.status, "Evicted job");
    }
    expired.len()
}
