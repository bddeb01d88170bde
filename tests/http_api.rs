use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use flood_classifier::{
    config::{ServerConfig, StartupMode},
    models::{Device, InferenceBackend, ModelProfile, ProfilePreset},
    web::{create_app, AppState},
    ClassifierError, FloodClassifier, ModelManager, Result,
};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, Array4, Axis};
use serde_json::Value;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "flood-test-boundary";

/// 按红色通道均值打分：亮图落在最后一类，暗图落在第一类
struct BrightnessBackend;

impl InferenceBackend for BrightnessBackend {
    fn forward(&self, input: Array4<f32>) -> Result<Array2<f32>> {
        let red = input.index_axis(Axis(1), 0);
        let mean = red.mean().unwrap_or(0.0);
        Ok(Array2::from_shape_vec((1, 3), vec![-mean, 0.0, mean]).expect("shape"))
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// 启用后每次前向推理都会休眠，并记录同时进行的推理数
#[derive(Clone, Default)]
struct SlowBackend {
    armed: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
}

impl InferenceBackend for SlowBackend {
    fn forward(&self, _input: Array4<f32>) -> Result<Array2<f32>> {
        if self.armed.load(Ordering::SeqCst) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2500));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Array2::from_shape_vec((1, 3), vec![0.0, 1.0, 0.0]).expect("shape"))
    }

    fn device(&self) -> Device {
        Device::Cpu
    }
}

fn ready_app() -> Router {
    let profile = ModelProfile::preset(ProfilePreset::WaterDepth);
    let classifier = FloodClassifier::new(profile, Box::new(BrightnessBackend)).unwrap();
    app_with(ModelManager::ready(classifier), &ServerConfig::default())
}

fn app_with(manager: ModelManager, server_config: &ServerConfig) -> Router {
    create_app(AppState::new(Arc::new(manager), server_config))
}

fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn multipart_request(field: &str, filename: Option<&str>, data: &[u8]) -> Request<Body> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, name),
        None => format!("form-data; name=\"{}\"", field),
    };

    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, disposition
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn predict_returns_class_label() {
    let app = ready_app();

    let (status, body) = send(
        &app,
        multipart_request("file", Some("flood.png"), &png(64, 48, [250, 250, 250])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({ "class": "knee_deep" }));

    let (status, body) = send(
        &app,
        multipart_request("file", Some("dry.png"), &png(64, 48, [0, 0, 0])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["class"], "none");
}

#[tokio::test]
async fn repeated_predictions_are_identical() {
    let app = ready_app();
    let image = png(37, 91, [120, 200, 40]);

    let (_, first) = send(&app, multipart_request("file", Some("a.png"), &image)).await;
    for _ in 0..5 {
        let (status, again) = send(&app, multipart_request("file", Some("a.png"), &image)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again, first);
    }
}

#[tokio::test]
async fn non_image_upload_is_a_client_error() {
    let app = ready_app();

    let (status, body) = send(
        &app,
        multipart_request("file", Some("notes.txt"), b"water was up to my knees"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid image");
    assert_eq!(body["code"], "INVALID_IMAGE");
}

#[tokio::test]
async fn missing_file_field_is_rejected() {
    let app = ready_app();

    let (status, body) = send(&app, multipart_request("comment", None, b"hello")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid request");
}

#[tokio::test]
async fn any_named_file_field_is_accepted() {
    let app = ready_app();

    let (status, body) = send(
        &app,
        multipart_request("image", Some("up.png"), &png(8, 8, [255, 255, 255])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["class"], "knee_deep");
}

#[tokio::test]
async fn non_multipart_body_is_rejected() {
    let app = ready_app();
    let req = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn unready_service_rejects_predictions() {
    let manager = ModelManager::from_load_result(
        ModelProfile::default(),
        StartupMode::Degraded,
        Err(ClassifierError::ModelLoad(
            "Weights file not found: ../training/seeflood_model.onnx".to_string(),
        )),
    )
    .unwrap();
    let app = app_with(manager, &ServerConfig::default());

    let (status, body) = send(
        &app,
        multipart_request("file", Some("flood.png"), &png(16, 16, [10, 10, 10])),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "model not ready");

    let health = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, health).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
    assert_eq!(body["status"], "unready");
    assert!(body["reason"]
        .as_str()
        .unwrap()
        .contains("seeflood_model.onnx"));
}

#[tokio::test]
async fn health_reports_ready_model() {
    let app = ready_app();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert_eq!(body["device"], "cpu");
}

#[tokio::test]
async fn info_describes_active_profile() {
    let app = ready_app();
    let req = Request::builder().uri("/api/info").body(Body::empty()).unwrap();

    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"]["profile"]["name"], "water-depth");
    assert_eq!(body["model"]["profile"]["input_resolution"], 224);
    assert_eq!(body["model"]["profile"]["decode_policy"], "argmax");
    assert_eq!(
        body["model"]["profile"]["labels"],
        serde_json::json!(["none", "ankle_deep", "knee_deep"])
    );
    assert_eq!(body["model"]["num_outputs"], 3);
    assert_eq!(body["limits"]["queue_capacity"], 36);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let server_config = ServerConfig {
        max_request_size: 1024,
        ..ServerConfig::default()
    };
    let profile = ModelProfile::preset(ProfilePreset::WaterDepth);
    let classifier = FloodClassifier::new(profile, Box::new(BrightnessBackend)).unwrap();
    let app = app_with(ModelManager::ready(classifier), &server_config);

    let response = app
        .oneshot(multipart_request("file", Some("big.bin"), &vec![7u8; 4096]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn timed_out_request_keeps_its_inference_slot() {
    let backend = SlowBackend::default();
    let profile = ModelProfile::preset(ProfilePreset::WaterDepth);
    let classifier = FloodClassifier::new(profile, Box::new(backend.clone())).unwrap();
    backend.armed.store(true, Ordering::SeqCst);

    let server_config = ServerConfig {
        request_timeout: 1,
        max_concurrent_inferences: 1,
        max_queued_requests: 0,
        ..ServerConfig::default()
    };
    let app = app_with(ModelManager::ready(classifier), &server_config);
    let image = png(16, 16, [90, 90, 90]);

    // 前向推理时间超过请求超时
    let response = app
        .clone()
        .oneshot(multipart_request("file", Some("slow.png"), &image))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(backend.in_flight.load(Ordering::SeqCst), 1);

    // 被放弃的任务仍占着唯一的槽位
    let (status, body) = send(&app, multipart_request("file", Some("next.png"), &image)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "server busy");

    while backend.finished.load(Ordering::SeqCst) < 1 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 任务结束后槽位重新可用
    let response = app
        .clone()
        .oneshot(multipart_request("file", Some("later.png"), &image))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    while backend.finished.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
}
