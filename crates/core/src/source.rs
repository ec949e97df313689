//! Input source helpers: URL validation, Google Drive link resolution,
//! and file name / extension rules for staged inputs.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

/// Audio container extensions accepted for upload.
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "aac", "ogg", "flac"];

/// Image extensions accepted for upload.
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Extension used for downloaded audio when the URL does not reveal one.
pub const DEFAULT_AUDIO_EXTENSION: &str = "mp3";

/// Extension used for a downloaded image when the URL does not reveal one.
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

const GOOGLE_DRIVE_HOST: &str = "drive.google.com";

static DRIVE_PATH_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/d/([A-Za-z0-9_-]+)").expect("valid regex"));

static DRIVE_QUERY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]id=([A-Za-z0-9_-]+)").expect("valid regex"));

/// Validate that a source URL is non-empty and uses http or https.
pub fn validate_source_url(url: &str) -> Result<(), CoreError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Source URL must not be empty".to_string()));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(CoreError::Validation(format!(
            "Source URL must start with http:// or https://, got: '{trimmed}'"
        )));
    }
    Ok(())
}

/// Whether the URL points at Google Drive.
pub fn is_google_drive_url(url: &str) -> bool {
    url.contains(GOOGLE_DRIVE_HOST)
}

/// Turn a Google Drive share link into a direct-download link.
///
/// Both `/file/d/<ID>/view` and `open?id=<ID>` forms are recognised. Any
/// other URL is returned unchanged.
pub fn resolve_download_url(url: &str) -> Result<String, CoreError> {
    let trimmed = url.trim();
    if !is_google_drive_url(trimmed) {
        return Ok(trimmed.to_string());
    }

    let file_id = DRIVE_PATH_ID_RE
        .captures(trimmed)
        .or_else(|| DRIVE_QUERY_ID_RE.captures(trimmed))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            CoreError::Validation(format!("Cannot find a file id in Google Drive URL: '{trimmed}'"))
        })?;

    Ok(format!(
        "https://{GOOGLE_DRIVE_HOST}/uc?id={file_id}&export=download"
    ))
}

/// Guess a file extension from the last path segment of a URL.
///
/// Query strings and fragments are ignored. Drive links never carry a
/// usable extension, so `None` is returned for them.
pub fn extension_from_url(url: &str) -> Option<String> {
    if is_google_drive_url(url) {
        return None;
    }
    let without_query = url.split(['?', '#']).next().unwrap_or("");
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    // The first segment is the host.
    let (_, path) = after_scheme.split_once('/')?;
    let segment = path.rsplit('/').next()?;
    extension_of(segment)
}

/// Lowercase extension of a file name, if it has one.
pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Validate an uploaded audio file name and return its extension.
pub fn validate_audio_filename(filename: &str) -> Result<String, CoreError> {
    validate_extension(filename, SUPPORTED_AUDIO_EXTENSIONS, "audio")
}

/// Validate an uploaded image file name and return its extension.
pub fn validate_image_filename(filename: &str) -> Result<String, CoreError> {
    validate_extension(filename, SUPPORTED_IMAGE_EXTENSIONS, "image")
}

fn validate_extension(
    filename: &str,
    allowed: &[&str],
    kind: &str,
) -> Result<String, CoreError> {
    match extension_of(filename) {
        Some(ext) if allowed.contains(&ext.as_str()) => Ok(ext),
        Some(ext) => Err(CoreError::Validation(format!(
            "Unsupported {kind} format '.{ext}'. Supported: {}",
            allowed.join(", ")
        ))),
        None => Err(CoreError::Validation(format!(
            "Cannot determine {kind} format of '{filename}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn drive_view_link_is_rewritten() {
        let url = "https://drive.google.com/file/d/1AbC_d-9/view?usp=sharing";
        assert_eq!(
            resolve_download_url(url).unwrap(),
            "https://drive.google.com/uc?id=1AbC_d-9&export=download"
        );
    }

    #[test]
    fn drive_open_link_is_rewritten() {
        let url = "https://drive.google.com/open?id=XYZ123";
        assert_eq!(
            resolve_download_url(url).unwrap(),
            "https://drive.google.com/uc?id=XYZ123&export=download"
        );
    }

    #[test]
    fn drive_link_without_id_is_rejected() {
        assert_matches!(
            resolve_download_url("https://drive.google.com/drive/my-drive"),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn plain_url_passes_through() {
        let url = "https://cdn.example.com/track.mp3";
        assert_eq!(resolve_download_url(url).unwrap(), url);
    }

    #[test]
    fn validate_source_url_rules() {
        assert!(validate_source_url("https://example.com/a.mp3").is_ok());
        assert!(validate_source_url("http://example.com/a.mp3").is_ok());
        assert!(validate_source_url("   ").is_err());
        assert!(validate_source_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn extension_from_url_ignores_query_and_host() {
        assert_eq!(
            extension_from_url("https://cdn.example.com/a/b/song.WAV?sig=1.2"),
            Some("wav".to_string())
        );
        assert_eq!(extension_from_url("https://example.com"), None);
        assert_eq!(extension_from_url("https://example.com/download"), None);
        assert_eq!(
            extension_from_url("https://drive.google.com/file/d/abc.mp3/view"),
            None
        );
    }

    #[test]
    fn extension_of_handles_edge_cases() {
        assert_eq!(extension_of("a.MP3"), Some("mp3".to_string()));
        assert_eq!(extension_of("archive.tar.gz"), Some("gz".to_string()));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn audio_and_image_validation() {
        assert_eq!(validate_audio_filename("intro.mp3").unwrap(), "mp3");
        assert_eq!(validate_image_filename("cover.JPEG").unwrap(), "jpeg");
        assert!(validate_audio_filename("cover.png").is_err());
        assert!(validate_image_filename("song.mp3").is_err());
        assert!(validate_audio_filename("README").is_err());
    }
}
