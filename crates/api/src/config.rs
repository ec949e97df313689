use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vidgen_core::ffmpeg::FfmpegTools;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `5000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `300`). Uploads of long
    /// audio tracks can take a while, hence the generous default.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for running jobs to settle (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Root directory for per-job working directories.
    pub work_dir: PathBuf,
    /// ffmpeg / ffprobe binaries.
    pub ffmpeg: FfmpegTools,
    /// Maximum number of jobs encoding at the same time (default: `2`).
    pub max_concurrent_jobs: usize,
    /// Request body cap for multipart uploads.
    pub max_upload_bytes: usize,
    /// Cap on a single downloaded input file.
    pub max_download_bytes: u64,
    /// Per-file download timeout in seconds (default: `600`).
    pub download_timeout_secs: u64,
    /// How long finished jobs are kept before eviction (default: one day).
    pub job_retention_secs: u64,
    /// Interval between retention sweeps (default: `600`).
    pub retention_sweep_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `5000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `300`                   |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `WORK_DIR`              | `storage/jobs`          |
    /// | `FFMPEG_PATH`           | `ffmpeg`                |
    /// | `FFPROBE_PATH`          | `ffprobe`               |
    /// | `MAX_CONCURRENT_JOBS`   | `2`                     |
    /// | `MAX_UPLOAD_BYTES`      | `524288000`             |
    /// | `MAX_DOWNLOAD_BYTES`    | `524288000`             |
    /// | `DOWNLOAD_TIMEOUT_SECS` | `600`                   |
    /// | `JOB_RETENTION_SECS`    | `86400`                 |
    /// | `RETENTION_SWEEP_SECS`  | `600`                   |
    ///
    /// Panics on unparsable or unusable values so misconfiguration fails at
    /// startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let work_dir = std::env::var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("storage/jobs"));

        let ffmpeg = FfmpegTools::new(
            std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".into()),
            std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".into()),
        );

        let config = Self {
            host,
            port: env_or("PORT", 5000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 300),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            work_dir,
            ffmpeg,
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", 2),
            max_upload_bytes: env_or("MAX_UPLOAD_BYTES", 500 * 1024 * 1024),
            max_download_bytes: env_or("MAX_DOWNLOAD_BYTES", 500 * 1024 * 1024),
            download_timeout_secs: env_or("DOWNLOAD_TIMEOUT_SECS", 600),
            job_retention_secs: env_or("JOB_RETENTION_SECS", 86_400),
            retention_sweep_secs: env_or("RETENTION_SWEEP_SECS", 600),
        };
        config.assert_valid();
        config
    }

    /// Panics on values that parse but cannot work. Concurrency, request
    /// and download timeouts and the sweep period must all be non-zero.
    pub fn assert_valid(&self) {
        assert!(
            self.max_concurrent_jobs > 0,
            "MAX_CONCURRENT_JOBS must be at least 1"
        );
        assert!(
            self.request_timeout_secs > 0,
            "REQUEST_TIMEOUT_SECS must be at least 1"
        );
        assert!(
            self.download_timeout_secs > 0,
            "DOWNLOAD_TIMEOUT_SECS must be at least 1"
        );
        assert!(
            self.retention_sweep_secs > 0,
            "RETENTION_SWEEP_SECS must be at least 1"
        );
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: Vec::new(),
            request_timeout_secs: 300,
            shutdown_timeout_secs: 30,
            work_dir: PathBuf::from("storage/jobs"),
            ffmpeg: FfmpegTools::new("ffmpeg", "ffprobe"),
            max_concurrent_jobs: 2,
            max_upload_bytes: 1024,
            max_download_bytes: 1024,
            download_timeout_secs: 600,
            job_retention_secs: 86_400,
            retention_sweep_secs: 600,
        }
    }

    #[test]
    fn defaults_are_valid() {
        config().assert_valid();
    }

    #[test]
    fn zero_shutdown_timeout_and_retention_are_allowed() {
        let mut c = config();
        c.shutdown_timeout_secs = 0;
        c.job_retention_secs = 0;
        c.assert_valid();
    }

    #[test]
    #[should_panic(expected = "RETENTION_SWEEP_SECS must be at least 1")]
    fn zero_sweep_interval_is_rejected() {
        let mut c = config();
        c.retention_sweep_secs = 0;
        c.assert_valid();
    }

    #[test]
    #[should_panic(expected = "REQUEST_TIMEOUT_SECS must be at least 1")]
    fn zero_request_timeout_is_rejected() {
        let mut c = config();
        c.request_timeout_secs = 0;
        c.assert_valid();
    }

    #[test]
    #[should_panic(expected = "DOWNLOAD_TIMEOUT_SECS must be at least 1")]
    fn zero_download_timeout_is_rejected() {
        let mut c = config();
        c.download_timeout_secs = 0;
        c.assert_valid();
    }

    #[test]
    #[should_panic(expected = "MAX_CONCURRENT_JOBS must be at least 1")]
    fn zero_concurrency_is_rejected() {
        let mut c = config();
        c.max_concurrent_jobs = 0;
        c.assert_valid();
    }
}
