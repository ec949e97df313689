//! Fetches remote job inputs to the job's working directory.
//!
//! Google Drive share links are rewritten to direct-download links first.
//! Bodies are streamed to disk and capped at a configured size.

use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use vidgen_core::error::CoreError;
use vidgen_core::source;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    InvalidUrl(#[from] CoreError),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("{url} returned an HTML page instead of a file (is the Drive file shared publicly?)")]
    UnexpectedHtml { url: String },

    #[error("{url} exceeds the {limit} byte download limit")]
    TooLarge { url: String, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download was cancelled")]
    Cancelled,
}

/// Download `url` to `dest`, returning the number of bytes written.
///
/// Fails on non-2xx responses and when the body exceeds `max_bytes`. A
/// partially written file is left for the caller to clean up with the rest
/// of the job directory.
pub async fn download_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    max_bytes: u64,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let resolved = source::resolve_download_url(url)?;
    let request_error = |source| DownloadError::Request {
        url: resolved.clone(),
        source,
    };

    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        res = client.get(&resolved).send() => res.map_err(request_error)?,
    };

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            url: resolved.clone(),
            status: status.as_u16(),
        });
    }

    if source::is_google_drive_url(&resolved) && is_html(&response) {
        return Err(DownloadError::UnexpectedHtml { url: resolved.clone() });
    }

    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(DownloadError::TooLarge {
            url: resolved.clone(),
            limit: max_bytes,
        });
    }

    let mut file = tokio::fs::File::create(dest).await?;
    let mut body = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            next = body.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(request_error)?;
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(DownloadError::TooLarge {
                url: resolved.clone(),
                limit: max_bytes,
            });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    tracing::debug!(url = %resolved, bytes = written, dest = %dest.display(), "Input downloaded");
    Ok(written)
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"))
}
