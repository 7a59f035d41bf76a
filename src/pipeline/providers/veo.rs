use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::GeminiConfig;
use crate::pipeline::video::{VideoBackend, VideoError, VideoOperation, VideoStartRequest};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Long-running image-to-video backend: start, poll the operation, then download.
#[derive(Debug, Clone)]
pub struct VeoVideoBackend {
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl VeoVideoBackend {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.video_model.clone(),
        }
    }

    fn api_key(&self) -> Result<&str, VideoError> {
        self.api_key
            .as_deref()
            .ok_or(VideoError::MissingApiKey("GEMINI_API_KEY"))
    }

    fn client() -> Result<Client, VideoError> {
        Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VideoError::Transport(format!("http client init failed: {e}")))
    }

    fn send_json(&self, request: RequestBuilder, endpoint: &str) -> Result<Value, VideoError> {
        let resp = request
            .header("x-goog-api-key", self.api_key()?)
            .send()
            .map_err(|e| VideoError::Transport(format!("request to {endpoint} failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(VideoError::Transport(format!("HTTP {}: {body}", status.as_u16())));
        }
        resp.json::<Value>()
            .map_err(|e| VideoError::Transport(format!("JSON decode failed: {e}")))
    }
}

impl VideoBackend for VeoVideoBackend {
    fn start(&self, request: &VideoStartRequest<'_>) -> Result<VideoOperation, VideoError> {
        let model = request
            .options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.model.as_str());
        let endpoint = format!("{}/models/{}:predictLongRunning", self.api_base, model);
        let payload = build_predict_payload(request);
        debug!(endpoint = %endpoint, "starting video operation");

        let client = Self::client()?;
        let body = self.send_json(client.post(endpoint.as_str()).json(&payload), endpoint.as_str())?;
        parse_operation(&body)
    }

    fn poll(&self, operation: &VideoOperation) -> Result<VideoOperation, VideoError> {
        let endpoint = format!("{}/{}", self.api_base, operation.name.trim_start_matches('/'));
        let client = Self::client()?;
        let body = self.send_json(client.get(endpoint.as_str()), endpoint.as_str())?;
        let mut next = parse_operation(&body)?;
        if next.name.is_empty() {
            next.name = operation.name.clone();
        }
        Ok(next)
    }

    fn download(&self, uri: &str) -> Result<Vec<u8>, VideoError> {
        let client = Self::client()?;
        let resp = client
            .get(uri)
            .header("x-goog-api-key", self.api_key()?)
            .send()
            .map_err(|e| VideoError::Transport(format!("video download failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(VideoError::Transport(format!(
                "Failed to download video: HTTP {}",
                status.as_u16()
            )));
        }
        resp.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| VideoError::Transport(format!("video body read failed: {e}")))
    }
}

pub(crate) fn build_predict_payload(request: &VideoStartRequest<'_>) -> Value {
    json!({
        "instances": [{
            "prompt": request.prompt,
            "image": {
                "bytesBase64Encoded": BASE64_STANDARD.encode(request.image.bytes.as_slice()),
                "mimeType": request.image.mime_type,
            }
        }],
        "parameters": {
            "aspectRatio": request.options.aspect_ratio.as_str(),
            "durationSeconds": request.options.duration_seconds,
            "personGeneration": "allow_adult",
            "sampleCount": 1,
        }
    })
}

pub(crate) fn parse_operation(body: &Value) -> Result<VideoOperation, VideoError> {
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let done = body.get("done").and_then(Value::as_bool).unwrap_or(false);
    let error = body.get("error").map(|err| {
        err.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string())
    });
    let video_uri = body
        .pointer("/response/generateVideoResponse/generatedSamples/0/video/uri")
        .and_then(Value::as_str)
        .map(str::to_string);

    if name.is_empty() && !done {
        return Err(VideoError::Transport(String::from(
            "video operation response has no name",
        )));
    }
    Ok(VideoOperation {
        name,
        done,
        error,
        video_uri,
    })
}
