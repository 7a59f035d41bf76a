#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::{Rgba, RgbaImage};
use serde_json::Value;
use tower::ServiceExt;

use sprite_lab_core::api::server::{build_router_with_state, AppState};
use sprite_lab_core::pipeline::generation::GenerationService;
use sprite_lab_core::pipeline::inspect::encode_png;
use sprite_lab_core::pipeline::presets::PresetCatalog;
use sprite_lab_core::pipeline::providers::{
    BackendError, BackendImage, BackendInvocation, ImageGenerationBackend,
};
use sprite_lab_core::pipeline::video::{
    VideoBackend, VideoError, VideoOperation, VideoService, VideoStartRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SeenCall {
    pub prompt: String,
    pub image_count: usize,
}

#[derive(Clone, Default)]
pub struct FakeImageBackend {
    seen: Arc<Mutex<Vec<SeenCall>>>,
    queue: Arc<Mutex<VecDeque<Result<BackendImage, BackendError>>>>,
}

impl FakeImageBackend {
    pub fn with_responses(responses: Vec<Result<BackendImage, BackendError>>) -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            queue: Arc::new(Mutex::new(responses.into_iter().collect())),
        }
    }

    pub fn take_seen(&self) -> Vec<SeenCall> {
        std::mem::take(&mut *self.seen.lock().expect("fake backend mutex poisoned"))
    }
}

impl ImageGenerationBackend for FakeImageBackend {
    fn model(&self) -> &str {
        "fake-image-model"
    }

    fn invoke(&self, invocation: &BackendInvocation<'_>) -> Result<BackendImage, BackendError> {
        self.seen
            .lock()
            .expect("fake backend mutex poisoned")
            .push(SeenCall {
                prompt: invocation.prompt.to_string(),
                image_count: invocation.images.len(),
            });
        self.queue
            .lock()
            .expect("fake backend mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::NoImage { note: None }))
    }
}

/// Finishes on the first poll and serves fixed bytes.
#[derive(Clone, Default)]
pub struct FakeVideoBackend {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl FakeVideoBackend {
    pub fn take_prompts(&self) -> Vec<String> {
        std::mem::take(&mut *self.prompts.lock().expect("fake video mutex poisoned"))
    }
}

impl VideoBackend for FakeVideoBackend {
    fn start(&self, request: &VideoStartRequest<'_>) -> Result<VideoOperation, VideoError> {
        self.prompts
            .lock()
            .expect("fake video mutex poisoned")
            .push(request.prompt.to_string());
        Ok(VideoOperation {
            name: String::from("operations/fake"),
            done: false,
            error: None,
            video_uri: None,
        })
    }

    fn poll(&self, operation: &VideoOperation) -> Result<VideoOperation, VideoError> {
        Ok(VideoOperation {
            name: operation.name.clone(),
            done: true,
            error: None,
            video_uri: Some(String::from("https://files/fake.mp4")),
        })
    }

    fn download(&self, _uri: &str) -> Result<Vec<u8>, VideoError> {
        Ok(b"fake-mp4".to_vec())
    }
}

pub fn test_app(images: FakeImageBackend, video: FakeVideoBackend) -> Router {
    let state = AppState::new(
        GenerationService::new(Arc::new(images)),
        VideoService::new(Arc::new(video), Duration::ZERO, 3),
        PresetCatalog::builtin(),
    );
    build_router_with_state(state)
}

pub fn image_app(images: FakeImageBackend) -> Router {
    test_app(images, FakeVideoBackend::default())
}

pub fn limited_app(max_body_bytes: usize) -> Router {
    let state = AppState::new(
        GenerationService::new(Arc::new(FakeImageBackend::default())),
        VideoService::new(Arc::new(FakeVideoBackend::default()), Duration::ZERO, 3),
        PresetCatalog::builtin(),
    )
    .with_max_body_bytes(max_body_bytes);
    build_router_with_state(state)
}

/// Transparent canvas with one opaque pixel in the middle.
pub fn floating_sprite(width: u32, height: u32) -> Vec<u8> {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
    img.put_pixel(width / 2, height / 2, Rgba([200, 40, 40, 255]));
    encode_png(&img).expect("png encode")
}

pub fn opaque_image(width: u32, height: u32) -> Vec<u8> {
    encode_png(&RgbaImage::from_pixel(width, height, Rgba([20, 20, 20, 255]))).expect("png encode")
}

/// Opaque pseudo-random pixels, which PNG cannot compress much.
pub fn noisy_image(width: u32, height: u32) -> Vec<u8> {
    let mut seed: u32 = 0x2545_f491;
    let img = RgbaImage::from_fn(width, height, |_, _| {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let [r, g, b, _] = seed.to_le_bytes();
        Rgba([r, g, b, 255])
    });
    encode_png(&img).expect("png encode")
}

pub fn b64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

pub fn unb64(value: &Value) -> Vec<u8> {
    BASE64_STANDARD
        .decode(value.as_str().expect("base64 field should be a string"))
        .expect("base64 field should decode")
}

pub async fn send_json(
    app: Router,
    method: Method,
    uri: &str,
    body: Body,
    expected_status: StatusCode,
) -> Value {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .expect("request should build");

    let response = app
        .oneshot(request)
        .await
        .expect("router should return response");
    assert_eq!(response.status(), expected_status);

    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    serde_json::from_slice(body.as_ref()).expect("response should be valid JSON")
}
