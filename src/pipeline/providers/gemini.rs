use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::blocking::Client;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{BackendError, BackendImage, BackendInvocation, ImageGenerationBackend};
use crate::config::GeminiConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone)]
pub struct GeminiImageBackend {
    api_base: String,
    api_key: Option<String>,
    model: String,
}

impl GeminiImageBackend {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.image_model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        let model = self.model.trim();
        let model_path = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl ImageGenerationBackend for GeminiImageBackend {
    fn model(&self) -> &str {
        self.model.as_str()
    }

    fn invoke(&self, invocation: &BackendInvocation<'_>) -> Result<BackendImage, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(BackendError::MissingApiKey("GEMINI_API_KEY"))?;
        let endpoint = self.endpoint();
        let payload = build_generate_content_payload(invocation);

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(BackendError::ClientInit)?;
        debug!(
            endpoint = %endpoint,
            images = invocation.images.len(),
            "sending generateContent request"
        );
        let resp = client
            .post(endpoint.as_str())
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .map_err(|source| BackendError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = resp
            .json()
            .map_err(|e| BackendError::InvalidResponse(format!("JSON decode failed: {e}")))?;
        extract_image_part(&body)
    }
}

pub(crate) fn build_generate_content_payload(invocation: &BackendInvocation<'_>) -> Value {
    let mut parts = invocation
        .images
        .iter()
        .map(|image| {
            json!({
                "inlineData": {
                    "mimeType": image.mime_type,
                    "data": BASE64_STANDARD.encode(image.bytes.as_slice()),
                }
            })
        })
        .collect::<Vec<_>>();
    parts.push(json!({ "text": invocation.prompt }));

    let mut generation_config = Map::new();
    generation_config.insert(String::from("responseModalities"), json!(["IMAGE", "TEXT"]));
    if let Some(temperature) = invocation.options.temperature {
        generation_config.insert(String::from("temperature"), json!(temperature));
    }
    if let Some(top_p) = invocation.options.top_p {
        generation_config.insert(String::from("topP"), json!(top_p));
    }
    if let Some(top_k) = invocation.options.top_k {
        generation_config.insert(String::from("topK"), json!(top_k));
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": Value::Object(generation_config),
    })
}

/// Pulls the first inline image out of a `generateContent` response.
///
/// Text parts are collected into the note so a refusal is diagnosable.
pub(crate) fn extract_image_part(body: &Value) -> Result<BackendImage, BackendError> {
    let parts = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut image: Option<(Vec<u8>, Option<String>)> = None;
    let mut notes = Vec::new();
    for part in parts.iter() {
        if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
            if image.is_some() {
                continue;
            }
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64_STANDARD
                .decode(data.as_bytes())
                .map_err(|e| BackendError::InvalidResponse(format!("image base64 decode failed: {e}")))?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            image = Some((bytes, mime_type));
        } else if let Some(text) = part.get("text").and_then(Value::as_str) {
            let text = text.trim();
            if !text.is_empty() {
                notes.push(text.to_string());
            }
        }
    }

    if notes.is_empty() {
        if let Some(reason) = body
            .get("promptFeedback")
            .and_then(|f| f.get("blockReason"))
            .and_then(Value::as_str)
        {
            notes.push(format!("blocked: {reason}"));
        }
    }
    let note = if notes.is_empty() {
        None
    } else {
        Some(notes.join("\n"))
    };

    match image {
        Some((bytes, mime_type)) => Ok(BackendImage {
            bytes,
            mime_type,
            note,
        }),
        None => Err(BackendError::NoImage { note }),
    }
}
