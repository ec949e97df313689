//! FFmpeg/FFprobe command utilities.
//!
//! Builds the two command lines the service needs (audio concatenation and
//! still-image rendering), runs them with cancellation support, and parses
//! the `-progress` key/value stream and ffprobe JSON output.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("input file not found: {0}")]
    InputNotFound(String),

    #[error("ffmpeg run was cancelled")]
    Cancelled,
}

/// Locations of the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegTools {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Whether `ffmpeg -version` runs and exits successfully.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub index: i32,
    pub codec_name: Option<String>,
    pub codec_type: Option<String>,
    pub duration: Option<String>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
    pub format_name: Option<String>,
}

/// Run `ffprobe` on a media file and return the parsed JSON output.
pub async fn probe_media(tools: &FfmpegTools, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::InputNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = Command::new(&tools.ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Media duration in seconds: the format-level value, else the first
/// stream that reports one, else `0.0`.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    if let Some(secs) = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
    {
        return secs;
    }
    probe
        .streams
        .iter()
        .filter_map(|s| s.duration.as_deref())
        .find_map(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Contents of a concat demuxer list, one `file '<path>'` line per input.
///
/// Single quotes inside paths are written as `'\''`.
pub fn concat_list_contents(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| {
            let escaped = p.to_string_lossy().replace('\'', r"'\''");
            format!("file '{escaped}'\n")
        })
        .collect()
}

/// Write the concat demuxer list for `inputs` to `list_path`.
pub async fn write_concat_list(list_path: &Path, inputs: &[PathBuf]) -> Result<(), FfmpegError> {
    let mut file = tokio::fs::File::create(list_path).await?;
    file.write_all(concat_list_contents(inputs).as_bytes())
        .await?;
    file.flush().await?;
    Ok(())
}

/// How the concat step treats the audio streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatMode {
    /// Stream copy. Only valid when every input shares a codec.
    Copy,
    /// Re-encode to AAC so mixed formats can be joined.
    ReencodeAac,
}

/// Choose how to join `inputs` and the extension of the joined file.
///
/// Inputs sharing one extension are stream-copied into that container;
/// anything mixed is re-encoded to AAC in an `m4a`.
pub fn plan_concat(inputs: &[PathBuf]) -> (ConcatMode, String) {
    let extensions: Vec<Option<String>> = inputs
        .iter()
        .map(|p| p.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()))
        .collect();
    match extensions.first() {
        Some(Some(first)) if extensions.iter().all(|e| e.as_ref() == Some(first)) => {
            (ConcatMode::Copy, first.clone())
        }
        _ => (ConcatMode::ReencodeAac, "m4a".to_string()),
    }
}

/// Arguments for joining the listed audio files into `output`.
pub fn concat_args(list_path: &Path, output: &Path, mode: ConcatMode) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(list_path.into());
    match mode {
        ConcatMode::Copy => args.extend(["-c", "copy"].map(OsString::from)),
        ConcatMode::ReencodeAac => {
            args.extend(["-vn", "-c:a", "aac", "-b:a", "192k"].map(OsString::from))
        }
    }
    args.push(output.into());
    args
}

/// Encoder settings for the still-image render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub video_bitrate: String,
    pub pixel_format: String,
    /// Cap on output length in seconds (`-t`).
    pub max_duration_secs: Option<f64>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            audio_bitrate: "192k".into(),
            video_bitrate: "1000k".into(),
            pixel_format: "yuv420p".into(),
            max_duration_secs: None,
        }
    }
}

/// Arguments for looping `image` over `audio` into an MP4 at `output`.
///
/// Progress is written to stdout as `key=value` lines.
pub fn render_args(
    image: &Path,
    audio: &Path,
    output: &Path,
    settings: &RenderSettings,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-loop".into(), "1".into(), "-i".into()];
    args.push(image.into());
    args.push("-i".into());
    args.push(audio.into());
    for (flag, value) in [
        ("-c:v", &settings.video_codec),
        ("-c:a", &settings.audio_codec),
        ("-b:a", &settings.audio_bitrate),
        ("-b:v", &settings.video_bitrate),
        ("-pix_fmt", &settings.pixel_format),
    ] {
        args.push(flag.into());
        args.push(value.into());
    }
    args.push("-shortest".into());
    if let Some(max) = settings.max_duration_secs {
        args.push("-t".into());
        args.push(format!("{max:.3}").into());
    }
    args.extend(["-progress", "pipe:1", "-nostats"].map(OsString::from));
    args.push(output.into());
    args
}

/// A meaningful line from ffmpeg's `-progress` output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressUpdate {
    /// Seconds of output written so far.
    OutTime(f64),
    /// ffmpeg finished writing.
    End,
}

/// Parse one `key=value` line of `-progress` output.
///
/// `out_time_ms` is reported by ffmpeg in microseconds, same as
/// `out_time_us`.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => value
            .parse::<i64>()
            .ok()
            .filter(|us| *us >= 0)
            .map(|us| ProgressUpdate::OutTime(us as f64 / 1_000_000.0)),
        "out_time" => parse_clock(value).map(ProgressUpdate::OutTime),
        "progress" if value == "end" => Some(ProgressUpdate::End),
        _ => None,
    }
}

/// Parse `HH:MM:SS.ffffff` into seconds.
fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let h = parts.next()?.parse::<f64>().ok()?;
    let m = parts.next()?.parse::<f64>().ok()?;
    let s = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() || h < 0.0 || m < 0.0 || s < 0.0 {
        return None;
    }
    Some(h * 3600.0 + m * 60.0 + s)
}

/// Percentage of `total_secs` covered by `out_secs`, capped at 99 so that
/// 100 is only reported once the job has actually finished.
pub fn progress_percent(out_secs: f64, total_secs: f64) -> u8 {
    if !total_secs.is_finite() || total_secs <= 0.0 || !out_secs.is_finite() {
        return 0;
    }
    let pct = (out_secs / total_secs * 100.0).floor();
    pct.clamp(0.0, 99.0) as u8
}

/// Run ffmpeg with `args`, forwarding parsed progress lines to
/// `on_progress`.
///
/// The child is killed if `cancel` fires. A non-zero exit becomes
/// [`FfmpegError::ExecutionFailed`] carrying the tail of stderr.
pub async fn run_ffmpeg<F, Fut>(
    tools: &FfmpegTools,
    args: &[OsString],
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<(), FfmpegError>
where
    F: FnMut(ProgressUpdate) -> Fut,
    Fut: Future<Output = ()>,
{
    tracing::debug!(program = %tools.ffmpeg.display(), ?args, "Spawning ffmpeg");

    let mut child = Command::new(&tools.ffmpeg)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(FfmpegError::NotFound)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("ffmpeg stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("ffmpeg stderr was not captured"))?;

    // stderr is drained to EOF as raw bytes: metadata tags are not always
    // UTF-8, and a closed pipe would kill ffmpeg with SIGPIPE.
    let stderr_task = tokio::spawn(async move {
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(String::from_utf8_lossy(&buf).trim_end().to_string());
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Stopped reading ffmpeg stderr");
                    break;
                }
            }
        }
        Vec::from(tail).join("\n")
    });

    enum Outcome {
        Exited(ExitStatus),
        Cancelled,
    }

    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_open = true;

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Outcome::Cancelled,
            line = lines.next_line(), if stdout_open => match line? {
                Some(line) => {
                    if let Some(update) = parse_progress_line(&line) {
                        on_progress(update).await;
                    }
                }
                None => stdout_open = false,
            },
            status = child.wait(), if !stdout_open => break Outcome::Exited(status?),
        }
    };

    let status = match outcome {
        Outcome::Exited(status) => status,
        Outcome::Cancelled => {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill cancelled ffmpeg process");
            }
            stderr_task.abort();
            return Err(FfmpegError::Cancelled);
        }
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();

    if !status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: status.code(),
            stderr: stderr_tail,
        });
    }

    Ok(())
}
