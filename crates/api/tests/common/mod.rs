#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::routing::get as get_route;
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use vidgen_api::config::ServerConfig;
use vidgen_api::router::build_app_router;
use vidgen_api::state::AppState;
use vidgen_core::ffmpeg::FfmpegTools;

/// Stand-in ffmpeg. It writes a small file to its last argument (the
/// output path) and prints a progress block. Outputs whose path contains
/// `fail-` exit non-zero; paths containing `slow-` block until killed.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
  -version) exit 0 ;;
  *fail-*) echo "simulated encoder failure" >&2; exit 1 ;;
  *slow-*) exec sleep 30 ;;
esac
echo "out_time_us=500000"
echo "progress=continue"
echo "progress=end"
printf 'fake-mp4' > "$last"
"#;

const FAKE_FFPROBE: &str = r#"#!/bin/sh
echo '{"streams":[],"format":{"duration":"1.0","format_name":"mp3"}}'
"#;

/// Fake tool binaries, written once per test binary.
pub fn fake_tools() -> FfmpegTools {
    static TOOLS: OnceLock<(TempDir, FfmpegTools)> = OnceLock::new();
    TOOLS
        .get_or_init(|| {
            let dir = tempfile::Builder::new()
                .prefix("vidgen-tools")
                .tempdir()
                .unwrap();
            let ffmpeg = write_script(dir.path(), "ffmpeg", FAKE_FFMPEG);
            let ffprobe = write_script(dir.path(), "ffprobe", FAKE_FFPROBE);
            (dir, FfmpegTools::new(ffmpeg, ffprobe))
        })
        .1
        .clone()
}

fn write_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Build a test `ServerConfig` rooted at `work_dir`.
pub fn test_config(work_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        work_dir: work_dir.to_path_buf(),
        ffmpeg: fake_tools(),
        max_concurrent_jobs: 2,
        max_upload_bytes: 10 * 1024 * 1024,
        max_download_bytes: 10 * 1024 * 1024,
        download_timeout_secs: 10,
        job_retention_secs: 3600,
        retention_sweep_secs: 600,
    }
}

/// A router plus the state and temporary working directory behind it.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub work_dir: TempDir,
}

/// Full application with fake ffmpeg tools and a fresh working directory.
pub fn build_test_app() -> TestApp {
    build_test_app_in(".tmp", |_| {})
}

/// Like [`build_test_app`], but the working directory name starts with
/// `prefix` (see [`FAKE_FFMPEG`]) and `tweak` may adjust the config.
pub fn build_test_app_in(prefix: &str, tweak: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let work_dir = tempfile::Builder::new().prefix(prefix).tempdir().unwrap();
    let mut config = test_config(work_dir.path());
    tweak(&mut config);
    let state = AppState::new(config.clone()).unwrap();
    let app = build_app_router(state.clone(), &config);
    TestApp {
        app,
        state,
        work_dir,
    }
}

pub async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response {
    post_raw(app, uri, "application/json", body.to_string().into_bytes()).await
}

pub async fn post_raw(app: &Router, uri: &str, content_type: &str, body: Vec<u8>) -> Response {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post_empty(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::post(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Poll `/status/{id}` until the job reaches `expected`, returning the
/// final status body.
pub async fn wait_for_status(app: &Router, job_id: &str, expected: &str) -> serde_json::Value {
    let mut last = serde_json::Value::Null;
    for _ in 0..200 {
        let response = get(app, &format!("/status/{job_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        last = body_json(response).await;
        if last["status"] == expected {
            return last;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} never reached '{expected}', last status: {last}");
}

const BOUNDARY: &str = "vidgen-test-boundary";

/// One multipart part. `filename: None` makes it a plain text field.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub data: &'a [u8],
}

pub fn file_part<'a>(name: &'a str, filename: &'a str, data: &'a [u8]) -> Part<'a> {
    Part {
        name,
        filename: Some(filename),
        data,
    }
}

pub fn text_part<'a>(name: &'a str, value: &'a str) -> Part<'a> {
    Part {
        name,
        filename: None,
        data: value.as_bytes(),
    }
}

/// Encode `parts` as `multipart/form-data`, returning the content type and body.
pub fn multipart_body(parts: &[Part<'_>]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    part.name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                    .as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

pub async fn post_multipart(app: &Router, uri: &str, parts: &[Part<'_>]) -> Response {
    let (content_type, body) = multipart_body(parts);
    post_raw(app, uri, &content_type, body).await
}

/// Send the first `sent` bytes of a multipart body, then stall forever as a
/// client that went quiet mid-upload would.
pub async fn post_stalled_multipart(
    app: &Router,
    uri: &str,
    parts: &[Part<'_>],
    sent: usize,
) -> Response {
    let (content_type, mut body) = multipart_body(parts);
    body.truncate(sent);
    let stream = futures::stream::iter([Ok::<_, std::io::Error>(body)])
        .chain(futures::stream::pending());
    app.clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", content_type)
                .body(Body::from_stream(stream))
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Serve fake input files on an ephemeral port and return the base URL.
///
/// `/missing.mp3` answers 404.
pub async fn serve_inputs() -> String {
    let app = Router::new()
        .route("/intro.mp3", get_route(|| async { "ID3-intro" }))
        .route("/outro.mp3", get_route(|| async { "ID3-outro" }))
        .route("/cover.jpg", get_route(|| async { "JFIF-cover" }))
        .route(
            "/missing.mp3",
            get_route(|| async { StatusCode::NOT_FOUND }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
