use crate::error::AnalysisError;
use crate::pipeline::aggregator::VideoAnalyzer;
use crate::pipeline::types::{AnalysisReport, OPEN_ERROR_SENTINEL};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const VIDEO_FIELD: &str = "video";
const DEFAULT_SUFFIX: &str = ".mp4";

pub struct AppState {
    pub analyzer: Arc<VideoAnalyzer>,
    pub scratch_dir: PathBuf,
    pub strict_errors: bool,
}

#[derive(Serialize)]
struct ResultBody {
    result: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

fn error_response(status: StatusCode, error: &'static str, details: Option<String>) -> Response {
    (status, Json(ErrorBody { error, details })).into_response()
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Multipart(#[from] MultipartError),
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        match self {
            UploadError::Multipart(e) => {
                warn!("Rejected upload: {}", e.body_text());
                error_response(e.status(), "Upload failed", Some(e.body_text()))
            }
            UploadError::Io(e) => {
                error!("Failed to write upload to scratch file: {}", e);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    Some(e.to_string()),
                )
            }
        }
    }
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/analyze", post(analyze_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn index_handler() -> &'static str {
    "🐶 Dog Panting Detection API is up and running!"
}

pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn analyze_handler(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let upload = match save_video_field(&mut multipart, &state.scratch_dir).await {
        Ok(Some(upload)) => upload,
        Ok(None) => {
            warn!("No '{}' field found in request", VIDEO_FIELD);
            return error_response(StatusCode::BAD_REQUEST, "No video file provided", None);
        }
        Err(e) => return e.into_response(),
    };

    let path = upload.path().to_path_buf();
    info!("Saved video to: {}", path.display());

    let analyzer = state.analyzer.clone();
    let outcome = tokio::task::spawn_blocking(move || analyzer.analyze(&path)).await;

    let response = match outcome {
        Ok(result) => verdict_response(result, state.strict_errors),
        Err(join_err) => {
            error!("Analysis task failed: {}", join_err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                Some(join_err.to_string()),
            )
        }
    };

    let scratch = upload.path().to_path_buf();
    match upload.close() {
        Ok(()) => info!("Deleted temp file: {}", scratch.display()),
        Err(e) => warn!("Failed to delete temp file {}: {}", scratch.display(), e),
    }

    response
}

fn verdict_response(result: Result<AnalysisReport, AnalysisError>, strict_errors: bool) -> Response {
    match result {
        Ok(report) => {
            info!("Analysis result: {}", report.message);
            Json(ResultBody {
                result: report.message.to_string(),
            })
            .into_response()
        }
        Err(e) if e.is_open() && !strict_errors => {
            warn!("{}", e);
            Json(ResultBody {
                result: OPEN_ERROR_SENTINEL.to_string(),
            })
            .into_response()
        }
        Err(e) if e.is_open() => {
            warn!("{}", e);
            error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Could not open video",
                Some(e.to_string()),
            )
        }
        Err(e) => {
            error!("Exception occurred during processing: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                Some(e.to_string()),
            )
        }
    }
}

/// Streams the first `video` field into a scratch file that is deleted when
/// dropped. Other fields are ignored.
async fn save_video_field(
    multipart: &mut Multipart,
    scratch_dir: &Path,
) -> Result<Option<NamedTempFile>, UploadError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        info!(
            "Received video file: {}",
            field.file_name().unwrap_or("<unnamed>")
        );
        let suffix = upload_suffix(field.file_name());
        let temp = tempfile::Builder::new()
            .prefix("panting-")
            .suffix(&suffix)
            .tempfile_in(scratch_dir)?;

        let mut out = tokio::fs::File::from_std(temp.reopen()?);
        while let Some(chunk) = field.chunk().await? {
            out.write_all(&chunk).await?;
        }
        out.flush().await?;

        return Ok(Some(temp));
    }
    Ok(None)
}

/// Extension of the uploaded file name (`.avi`, `.mov`, ...), or `.mp4`.
fn upload_suffix(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| DEFAULT_SUFFIX.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::aggregator::ScanOptions;
    use crate::pipeline::classifier::{ClassifierSource, FrameClassifier};
    use crate::pipeline::types::Prediction;
    use crate::video::sampler::tests::write_test_video;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use opencv::core::Mat;
    use tower::ServiceExt;

    const BOUNDARY: &str = "panting-test-boundary";

    struct BrightnessClassifier;

    impl FrameClassifier for BrightnessClassifier {
        fn predict(&self, frame: &Mat) -> Result<Prediction, AnalysisError> {
            let mean = opencv::core::mean_def(frame)?[0];
            Ok(Prediction::from_confidence((mean / 255.0) as f32))
        }
    }

    struct FakeSource {
        fail: bool,
    }

    impl ClassifierSource for FakeSource {
        fn load(&self) -> Result<Arc<dyn FrameClassifier>, AnalysisError> {
            if self.fail {
                return Err(AnalysisError::ModelLoad {
                    path: "models/panting_frame_model.pth".into(),
                    reason: "weights file not found".to_string(),
                });
            }
            Ok(Arc::new(BrightnessClassifier))
        }
    }

    struct Harness {
        app: Router,
        scratch: tempfile::TempDir,
    }

    fn harness(strict_errors: bool, model_fails: bool, max_upload_bytes: usize) -> Harness {
        let scratch = tempfile::tempdir().unwrap();
        let state = Arc::new(AppState {
            analyzer: Arc::new(VideoAnalyzer::new(
                Arc::new(FakeSource { fail: model_fails }),
                ScanOptions::default(),
            )),
            scratch_dir: scratch.path().to_path_buf(),
            strict_errors,
        });
        Harness {
            app: router(state, max_upload_bytes),
            scratch,
        }
    }

    fn multipart_request(field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/analyze")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn synthetic_video(values: &[f64]) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::read(write_test_video(dir.path(), values)).unwrap()
    }

    fn scratch_is_empty(h: &Harness) -> bool {
        std::fs::read_dir(h.scratch.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_index() {
        let h = harness(false, false, 1 << 20);
        let response = h
            .app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("up and running"));
    }

    #[tokio::test]
    async fn test_panting_video() {
        let h = harness(false, false, 10 << 20);
        let video: Vec<f64> = (0..10).map(|i| if i == 7 { 255.0 } else { 0.0 }).collect();
        let (status, json) = send(
            h.app.clone(),
            multipart_request("video", "clip.avi", &synthetic_video(&video)),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"], "The dog is panting.");
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn test_missing_video_field() {
        let h = harness(false, false, 1 << 20);
        let (status, json) = send(h.app.clone(), multipart_request("file", "clip.mp4", b"abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No video file provided");
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn test_unopenable_video_returns_legacy_sentinel() {
        let h = harness(false, false, 1 << 20);
        let (status, json) = send(h.app.clone(), multipart_request("video", "clip.mp4", b"")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"], OPEN_ERROR_SENTINEL);
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn test_unopenable_video_strict_mode() {
        let h = harness(true, false, 1 << 20);
        let (status, json) = send(h.app.clone(), multipart_request("video", "clip.mp4", b"")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"], "Could not open video");
        assert!(json["details"].is_string());
    }

    #[tokio::test]
    async fn test_model_failure_is_internal_error() {
        let h = harness(false, true, 10 << 20);
        let (status, json) = send(
            h.app.clone(),
            multipart_request("video", "clip.avi", &synthetic_video(&[0.0; 3])),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Internal server error");
        assert!(json["details"].as_str().unwrap().contains("weights file not found"));
        assert!(scratch_is_empty(&h));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let h = harness(false, false, 1024);
        let (status, _) = send(
            h.app.clone(),
            multipart_request("video", "clip.mp4", &vec![0u8; 8 * 1024]),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(scratch_is_empty(&h));
    }

    #[test]
    fn test_upload_suffix() {
        assert_eq!(upload_suffix(Some("dog.avi")), ".avi");
        assert_eq!(upload_suffix(Some("dog.MOV")), ".MOV");
        assert_eq!(upload_suffix(Some("dog")), ".mp4");
        assert_eq!(upload_suffix(Some("../weird.a/b c")), ".mp4");
        assert_eq!(upload_suffix(None), ".mp4");
    }
}
