//! Integration tests for the analyze API.
//!
//! Drives the router directly with `tower::ServiceExt::oneshot`, backing the
//! engine with scripted analyzers so no ONNX model files are needed.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use agefuse_core::{AnalyzerError, FaceAnalyzer, FaceReading};
use agefused::engine::spawn_with_analyzers;
use agefused::server::{build_router, AppContext};

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";
const ORIGIN: &str = "http://localhost:3000";

/// Analyzer that replays a scripted sequence of outcomes, one per image.
struct ScriptedAnalyzer {
    name: &'static str,
    script: Arc<Mutex<VecDeque<Result<Option<FaceReading>, String>>>>,
}

impl ScriptedAnalyzer {
    fn new(name: &'static str, script: Vec<Result<Option<FaceReading>, String>>) -> Self {
        Self {
            name,
            script: Arc::new(Mutex::new(script.into())),
        }
    }
}

impl FaceAnalyzer for ScriptedAnalyzer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(
        &mut self,
        _image: &image::RgbImage,
    ) -> Result<Option<FaceReading>, AnalyzerError> {
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("analyzer called more times than scripted");
        next.map_err(AnalyzerError::InferenceFailed)
    }
}

fn reading(age: f32, confidence: f32, emotion: Option<&str>) -> Result<Option<FaceReading>, String> {
    Ok(Some(FaceReading {
        age,
        confidence,
        emotion: emotion.map(str::to_string),
    }))
}

fn router_with(deepface: ScriptedAnalyzer, insightface: ScriptedAnalyzer) -> axum::Router {
    let engine = spawn_with_analyzers(Box::new(deepface), Box::new(insightface), 40.0);
    build_router(AppContext { engine }, ORIGIN).unwrap()
}

fn png_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([120, 110, 100]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn multipart_body(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, (field, bytes)) in parts.iter().enumerate() {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"img{i}.png\"\r\n\
                 Content-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn post_analyze(app: &axum::Router, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/analyze")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

fn assert_field(body: &Value, field: &str, expected: f64) {
    let actual = body[field].as_f64().unwrap_or_else(|| panic!("missing {field}"));
    assert!(
        (actual - expected).abs() < 1e-6,
        "{field}: {actual} vs {expected}"
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = router_with(
        ScriptedAnalyzer::new("DeepFace", vec![]),
        ScriptedAnalyzer::new("InsightFace", vec![]),
    );

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["module"], "agefused");
}

#[tokio::test]
async fn test_analyze_single_image() {
    let app = router_with(
        ScriptedAnalyzer::new("DeepFace", vec![reading(35.0, 0.9, Some("happy"))]),
        ScriptedAnalyzer::new("InsightFace", vec![reading(45.0, 0.6, None)]),
    );

    let png = png_bytes();
    let (status, body) = post_analyze(&app, multipart_body(&[("files", &png)])).await;

    assert_eq!(status, StatusCode::OK);
    assert_field(&body, "final_fused_age", 37.0);
    assert_field(&body, "final_deepface_age", 35.0);
    assert_field(&body, "final_insightface_age", 45.0);
    assert_field(&body, "final_deepface_conf", 0.9);
    assert_field(&body, "final_insightface_conf", 0.6);
    assert_eq!(body["dominant_emotion"], "happy");
}

#[tokio::test]
async fn test_analyze_batch_aggregates_and_votes_emotion() {
    let app = router_with(
        ScriptedAnalyzer::new(
            "DeepFace",
            vec![
                reading(20.0, 0.8, Some("happy")),
                reading(30.0, 0.8, Some("sad")),
                reading(40.0, 0.8, Some("happy")),
            ],
        ),
        ScriptedAnalyzer::new(
            "InsightFace",
            vec![
                reading(20.0, 0.8, None),
                reading(30.0, 0.8, None),
                reading(40.0, 0.8, None),
            ],
        ),
    );

    let png = png_bytes();
    let body_bytes = multipart_body(&[("files", &png), ("files", &png), ("files", &png)]);
    let (status, body) = post_analyze(&app, body_bytes).await;

    assert_eq!(status, StatusCode::OK);
    // Equal source ages fuse to themselves, so the batch mean is 30.0.
    assert_field(&body, "final_fused_age", 30.0);
    assert_field(&body, "final_deepface_age", 30.0);
    assert_eq!(body["dominant_emotion"], "happy");
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let app = router_with(
        ScriptedAnalyzer::new("DeepFace", vec![]),
        ScriptedAnalyzer::new("InsightFace", vec![]),
    );

    let (status, body) = post_analyze(&app, multipart_body(&[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No images processed");
}

#[tokio::test]
async fn test_fields_with_other_names_are_ignored() {
    let app = router_with(
        ScriptedAnalyzer::new("DeepFace", vec![]),
        ScriptedAnalyzer::new("InsightFace", vec![]),
    );

    let png = png_bytes();
    let (status, body) = post_analyze(&app, multipart_body(&[("attachment", &png)])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No images processed");
}

#[tokio::test]
async fn test_no_face_aborts_whole_batch() {
    // Second image finds no face; the batch errors even though the first
    // image succeeded.
    let app = router_with(
        ScriptedAnalyzer::new(
            "DeepFace",
            vec![
                reading(35.0, 0.9, Some("happy")),
                reading(36.0, 0.9, Some("happy")),
            ],
        ),
        ScriptedAnalyzer::new("InsightFace", vec![reading(45.0, 0.6, None), Ok(None)]),
    );

    let png = png_bytes();
    let body_bytes = multipart_body(&[("files", &png), ("files", &png)]);
    let (status, body) = post_analyze(&app, body_bytes).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No face detected with InsightFace");
}

#[tokio::test]
async fn test_deepface_failure_is_reported() {
    let app = router_with(
        ScriptedAnalyzer::new("DeepFace", vec![Err("tensor shape mismatch".to_string())]),
        ScriptedAnalyzer::new("InsightFace", vec![]),
    );

    let png = png_bytes();
    let (status, body) = post_analyze(&app, multipart_body(&[("files", &png)])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "DeepFace analyze failed: inference failed: tensor shape mismatch"
    );
}

#[tokio::test]
async fn test_undecodable_image_is_rejected() {
    let app = router_with(
        ScriptedAnalyzer::new("DeepFace", vec![]),
        ScriptedAnalyzer::new("InsightFace", vec![]),
    );

    let garbage = b"definitely not an image";
    let (status, body) = post_analyze(&app, multipart_body(&[("files", garbage)])).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("Image decode failed:"), "{message}");
}

#[tokio::test]
async fn test_cors_preflight_reflects_fixed_origin() {
    let app = router_with(
        ScriptedAnalyzer::new("DeepFace", vec![]),
        ScriptedAnalyzer::new("InsightFace", vec![]),
    );

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/analyze")
        .header(header::ORIGIN, ORIGIN)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let headers = response.headers();
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some(ORIGIN)
    );
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
}
