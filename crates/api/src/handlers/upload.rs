//! Multipart upload submission: the audio tracks and the image are sent in
//! the request body instead of as URLs.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tokio::io::AsyncWriteExt;
use vidgen_core::job::{validate_target_duration, Job, JobSource};
use vidgen_core::source;

use crate::engine::runner::remove_job_dir;
use crate::engine::JobInputs;
use crate::error::{AppError, AppResult};
use crate::handlers::SubmitResponse;
use crate::state::AppState;

/// How a multipart field is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Audio,
    Image,
    TargetDuration,
    Ignored,
}

/// `audio`, `audio[]` and `audio_<n>` are all audio tracks, kept in the
/// order they appear in the body.
fn classify_field(name: &str) -> FieldKind {
    match name {
        "audio" | "audio[]" => FieldKind::Audio,
        "image" => FieldKind::Image,
        "targetDuration" | "target_duration" => FieldKind::TargetDuration,
        n if n.starts_with("audio_") => FieldKind::Audio,
        _ => FieldKind::Ignored,
    }
}

/// Body-limit breaches keep their 413; every other multipart failure is a 400.
fn multipart_error(e: MultipartError) -> AppError {
    match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge(e.body_text()),
        _ => AppError::BadRequest(e.body_text()),
    }
}

/// Inputs written to the job directory.
#[derive(Debug)]
struct StagedUpload {
    audio: Vec<PathBuf>,
    image: PathBuf,
    target_duration: Option<f64>,
}

/// POST /upload
///
/// Accepts one or more `audio` file fields, exactly one `image` file field
/// and an optional `targetDuration` text field. Files are streamed to the
/// job's working directory before the job is queued; returns 202.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut job = Job::new(JobSource::Upload, 0, None);
    let staging = StagingDir::new(state.runner.job_dir(job.id));
    tokio::fs::create_dir_all(staging.path()).await?;

    let staged = match stage_upload(&mut multipart, staging.path()).await {
        Ok(staged) => staged,
        Err(e) => {
            staging.discard().await;
            return Err(e);
        }
    };

    job.audio_count = staged.audio.len();
    job.target_duration_secs = staged.target_duration;
    let job = state
        .runner
        .submit(
            job,
            JobInputs::Staged {
                audio: staged.audio,
                image: staged.image,
            },
        )
        .await;
    // The runner owns the directory from here on.
    staging.keep();

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from(&job))))
}

/// A job directory being filled by an upload.
///
/// Rejected uploads are removed with [`StagingDir::discard`]. If the
/// handler future is dropped mid-stream (client gone, request timeout) the
/// directory is removed on drop unless [`StagingDir::keep`] was called.
struct StagingDir {
    path: PathBuf,
    armed: bool,
}

impl StagingDir {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) {
        self.armed = false;
    }

    async fn discard(mut self) {
        self.armed = false;
        remove_job_dir(&self.path).await;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let path = std::mem::take(&mut self.path);
        tracing::debug!(dir = %path.display(), "Discarding unfinished upload");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { remove_job_dir(&path).await });
            }
            Err(_) => {
                if let Err(e) = std::fs::remove_dir_all(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(dir = %path.display(), error = %e, "Failed to remove upload directory");
                    }
                }
            }
        }
    }
}

async fn stage_upload(multipart: &mut Multipart, job_dir: &Path) -> AppResult<StagedUpload> {
    let mut audio = Vec::new();
    let mut image = None;
    let mut target_duration = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        match classify_field(&name) {
            FieldKind::Audio => {
                let filename = field.file_name().unwrap_or("").to_string();
                let ext = source::validate_audio_filename(&filename)?;
                let dest = job_dir.join(format!("audio_{}.{ext}", audio.len()));
                let bytes = write_field(&mut field, &dest).await?;
                tracing::debug!(field = %name, filename = %filename, bytes, "Staged audio upload");
                audio.push(dest);
            }
            FieldKind::Image => {
                if image.is_some() {
                    return Err(AppError::BadRequest(
                        "Only one 'image' file may be uploaded".into(),
                    ));
                }
                let filename = field.file_name().unwrap_or("").to_string();
                let ext = source::validate_image_filename(&filename)?;
                let dest = job_dir.join(format!("image.{ext}"));
                let bytes = write_field(&mut field, &dest).await?;
                tracing::debug!(filename = %filename, bytes, "Staged image upload");
                image = Some(dest);
            }
            FieldKind::TargetDuration => {
                let text = field.text().await.map_err(multipart_error)?;
                let secs: f64 = text.trim().parse().map_err(|_| {
                    AppError::BadRequest(format!("targetDuration must be a number, got '{text}'"))
                })?;
                validate_target_duration(Some(secs))?;
                target_duration = Some(secs);
            }
            FieldKind::Ignored => {
                tracing::debug!(field = %name, "Ignoring unknown upload field");
            }
        }
    }

    if audio.is_empty() {
        return Err(AppError::BadRequest(
            "Missing required 'audio' file field".into(),
        ));
    }
    let image =
        image.ok_or_else(|| AppError::BadRequest("Missing required 'image' file field".into()))?;

    Ok(StagedUpload {
        audio,
        image,
        target_duration,
    })
}

/// Stream one field's body to `dest`, returning the byte count. Empty
/// files are rejected.
async fn write_field(field: &mut Field<'_>, dest: &Path) -> AppResult<u64> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    if written == 0 {
        return Err(AppError::BadRequest(format!(
            "Uploaded file '{}' is empty",
            dest.file_name().and_then(|n| n.to_str()).unwrap_or("")
        )));
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn wait_until_gone(path: &Path) -> bool {
        for _ in 0..100 {
            if !path.exists() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn dropped_staging_dir_is_removed() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("job");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("audio_0.mp3"), b"partial").await.unwrap();

        drop(StagingDir::new(dir.clone()));

        assert!(wait_until_gone(&dir).await);
    }

    #[tokio::test]
    async fn discarded_staging_dir_is_removed_immediately() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("job");
        tokio::fs::create_dir_all(&dir).await.unwrap();

        StagingDir::new(dir.clone()).discard().await;

        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn kept_staging_dir_survives() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("job");
        tokio::fs::create_dir_all(&dir).await.unwrap();

        StagingDir::new(dir.clone()).keep();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(dir.exists());
    }

    #[test]
    fn staging_dir_dropped_outside_runtime_is_removed() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("job");
        std::fs::create_dir_all(&dir).unwrap();

        drop(StagingDir::new(dir.clone()));

        assert!(!dir.exists());
    }

    #[test]
    fn audio_field_names_are_recognised() {
        assert_eq!(classify_field("audio"), FieldKind::Audio);
        assert_eq!(classify_field("audio[]"), FieldKind::Audio);
        assert_eq!(classify_field("audio_3"), FieldKind::Audio);
        assert_eq!(classify_field("image"), FieldKind::Image);
        assert_eq!(classify_field("targetDuration"), FieldKind::TargetDuration);
        assert_eq!(classify_field("audiofile"), FieldKind::Ignored);
        assert_eq!(classify_field(""), FieldKind::Ignored);
    }
}
