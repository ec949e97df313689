//! The per-job encode pipeline: stage inputs, join the audio, render the
//! still-image video.
//!
//! Everything happens inside the job's own working directory. Status and
//! progress are written to the [`JobStore`] as each step starts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vidgen_core::error::CoreError;
use vidgen_core::ffmpeg::{self, FfmpegError, FfmpegTools, ProgressUpdate, RenderSettings};
use vidgen_core::job::JobStatus;
use vidgen_core::source;
use vidgen_core::types::JobId;

use crate::engine::downloader::{self, DownloadError};
use crate::store::JobStore;

/// Progress reported once the audio has been joined.
pub const CONCAT_DONE_PROGRESS: u8 = 10;

/// Highest progress reported while the render is still running.
const RENDER_PROGRESS_END: u8 = 99;

/// Where a job's audio and image come from.
#[derive(Debug, Clone)]
pub enum JobInputs {
    /// Remote files fetched by the pipeline.
    Urls {
        audio_urls: Vec<String>,
        image_url: String,
    },
    /// Files already written into the job directory by the upload handler.
    Staged { audio: Vec<PathBuf>, image: PathBuf },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("ffmpeg failed: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("job was cancelled")]
    Cancelled,

    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

impl PipelineError {
    /// Whether the error came from the job's cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled
                | PipelineError::Ffmpeg(FfmpegError::Cancelled)
                | PipelineError::Download(DownloadError::Cancelled)
        )
    }
}

/// Shared handles the pipeline needs.
pub struct PipelineContext<'a> {
    pub store: &'a Arc<JobStore>,
    pub tools: &'a FfmpegTools,
    pub http: &'a reqwest::Client,
    pub max_download_bytes: u64,
}

/// Run the whole pipeline for one job and return the rendered video path.
pub async fn execute(
    ctx: &PipelineContext<'_>,
    job_id: JobId,
    job_dir: &Path,
    inputs: JobInputs,
    target_duration: Option<f64>,
    cancel: &CancellationToken,
) -> Result<PathBuf, PipelineError> {
    tokio::fs::create_dir_all(job_dir).await?;

    let (audio, image) = match inputs {
        JobInputs::Urls {
            audio_urls,
            image_url,
        } => {
            ctx.store.transition(job_id, JobStatus::Downloading).await?;
            tracing::info!(%job_id, audio_count = audio_urls.len(), "Downloading job inputs");
            stage_remote_inputs(ctx, job_dir, &audio_urls, &image_url, cancel).await?
        }
        JobInputs::Staged { audio, image } => (audio, image),
    };

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    ctx.store.transition(job_id, JobStatus::Processing).await?;
    tracing::info!(%job_id, "Encoding started");

    // --- Join audio ---
    let list_path = job_dir.join("concat.txt");
    ffmpeg::write_concat_list(&list_path, &audio).await?;

    let (mode, ext) = ffmpeg::plan_concat(&audio);
    let combined = job_dir.join(format!("combined.{ext}"));
    ffmpeg::run_ffmpeg(
        ctx.tools,
        &ffmpeg::concat_args(&list_path, &combined, mode),
        cancel,
        |_| async {},
    )
    .await?;
    ctx.store.set_progress(job_id, CONCAT_DONE_PROGRESS).await;
    tracing::debug!(%job_id, ?mode, "Audio joined");

    // --- Render ---
    let total_secs = expected_duration(ctx.tools, &combined, target_duration).await;
    let output = job_dir.join(format!("video_{job_id}.mp4"));
    let settings = RenderSettings {
        max_duration_secs: target_duration,
        ..RenderSettings::default()
    };

    ffmpeg::run_ffmpeg(
        ctx.tools,
        &ffmpeg::render_args(&image, &combined, &output, &settings),
        cancel,
        |update| {
            let store = Arc::clone(ctx.store);
            async move {
                if let ProgressUpdate::OutTime(secs) = update {
                    let percent = render_progress(ffmpeg::progress_percent(secs, total_secs));
                    store.set_progress(job_id, percent).await;
                }
            }
        },
    )
    .await?;

    // Intermediates are no longer needed once the video exists.
    for path in audio.iter().chain([&image, &list_path, &combined]) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::debug!(%job_id, path = %path.display(), error = %e, "Could not remove intermediate file");
        }
    }

    Ok(output)
}

/// Download every audio URL and the image into `job_dir`.
async fn stage_remote_inputs(
    ctx: &PipelineContext<'_>,
    job_dir: &Path,
    audio_urls: &[String],
    image_url: &str,
    cancel: &CancellationToken,
) -> Result<(Vec<PathBuf>, PathBuf), PipelineError> {
    let mut audio = Vec::with_capacity(audio_urls.len());
    for (i, url) in audio_urls.iter().enumerate() {
        let ext = staged_extension(
            url,
            source::SUPPORTED_AUDIO_EXTENSIONS,
            source::DEFAULT_AUDIO_EXTENSION,
        );
        let dest = job_dir.join(format!("audio_{i}.{ext}"));
        downloader::download_to(ctx.http, url, &dest, ctx.max_download_bytes, cancel).await?;
        audio.push(dest);
    }

    let ext = staged_extension(
        image_url,
        source::SUPPORTED_IMAGE_EXTENSIONS,
        source::DEFAULT_IMAGE_EXTENSION,
    );
    let image = job_dir.join(format!("image.{ext}"));
    downloader::download_to(ctx.http, image_url, &image, ctx.max_download_bytes, cancel).await?;

    Ok((audio, image))
}

/// Extension for a downloaded file: the URL's own when it is one we
/// accept, otherwise `default`.
fn staged_extension(url: &str, allowed: &[&str], default: &str) -> String {
    source::extension_from_url(url)
        .filter(|ext| allowed.contains(&ext.as_str()))
        .unwrap_or_else(|| default.to_string())
}

/// Length of the video ffmpeg will write, used to turn `out_time` into a
/// percentage. Unknown durations yield `0.0`, which keeps progress at the
/// post-concat value until completion.
async fn expected_duration(
    tools: &FfmpegTools,
    combined_audio: &Path,
    target_duration: Option<f64>,
) -> f64 {
    let audio_secs = match ffmpeg::probe_media(tools, combined_audio).await {
        Ok(probe) => ffmpeg::parse_duration(&probe),
        Err(e) => {
            tracing::warn!(error = %e, "Could not probe joined audio; progress will be coarse");
            0.0
        }
    };
    match target_duration {
        Some(target) if audio_secs > 0.0 => target.min(audio_secs),
        Some(target) => target,
        None => audio_secs,
    }
}

/// Map a render percentage (`0..=99`) into the overall job range that
/// starts after the concat step.
fn render_progress(render_percent: u8) -> u8 {
    let span = u16::from(RENDER_PROGRESS_END - CONCAT_DONE_PROGRESS);
    let scaled = u16::from(render_percent.min(RENDER_PROGRESS_END)) * span / 99;
    CONCAT_DONE_PROGRESS + scaled as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_progress_spans_post_concat_range() {
        assert_eq!(render_progress(0), CONCAT_DONE_PROGRESS);
        assert_eq!(render_progress(99), 99);
        assert_eq!(render_progress(200), 99);
        let mid = render_progress(50);
        assert!(mid > CONCAT_DONE_PROGRESS && mid < 99);
    }

    #[test]
    fn staged_extension_prefers_supported_url_extension() {
        let audio = source::SUPPORTED_AUDIO_EXTENSIONS;
        assert_eq!(staged_extension("https://x.io/a.wav", audio, "mp3"), "wav");
        assert_eq!(staged_extension("https://x.io/a.exe", audio, "mp3"), "mp3");
        assert_eq!(
            staged_extension("https://drive.google.com/file/d/abc/view", audio, "mp3"),
            "mp3"
        );
    }

    #[test]
    fn cancellation_errors_are_recognised() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(PipelineError::Ffmpeg(FfmpegError::Cancelled).is_cancelled());
        assert!(PipelineError::Download(DownloadError::Cancelled).is_cancelled());
        assert!(!PipelineError::Panicked("x".into()).is_cancelled());
    }

    #[tokio::test]
    async fn expected_duration_falls_back_to_target() {
        let tools = FfmpegTools::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let missing = Path::new("/nonexistent/combined.mp3");
        assert_eq!(expected_duration(&tools, missing, Some(30.0)).await, 30.0);
        assert_eq!(expected_duration(&tools, missing, None).await, 0.0);
    }
}
