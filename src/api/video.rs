use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::handler_utils::{
    decode_base64_field, encode_base64, internal_error, into_json, map_video_error, not_found,
    validation_error, ApiObject,
};
use crate::api::server::AppState;
use crate::pipeline::providers::InputImage;
use crate::pipeline::video::{VideoGenerationOptions, VideoGenerationResult};

#[derive(Debug, Clone, Deserialize)]
pub struct VideoInput {
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub last_frame_base64: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub options: VideoGenerationOptions,
}

#[derive(Debug, Clone, Serialize)]
struct VideoResponse {
    ok: bool,
    video: VideoGenerationResult,
    mime_type: &'static str,
    video_base64: String,
}

pub async fn video_handler(
    State(state): State<AppState>,
    Json(payload): Json<VideoInput>,
) -> ApiObject<Value> {
    let prompt = payload.prompt.trim().to_string();
    if prompt.is_empty() {
        return validation_error("Field 'prompt' is required");
    }

    let first_frame = match (payload.artifact_id.as_deref(), payload.image_base64.as_deref()) {
        (Some(id), _) => {
            let Ok(artifacts) = state.artifacts.read() else {
                return internal_error("artifact store lock poisoned");
            };
            match artifacts.get(id) {
                Some(artifact) => InputImage::new(
                    artifact
                        .processed
                        .clone()
                        .unwrap_or_else(|| artifact.result.raw_image_bytes.clone()),
                ),
                None => return not_found(format!("Artifact not found: {id}")),
            }
        }
        (None, Some(encoded)) => match decode_base64_field("image_base64", encoded) {
            Ok(bytes) => InputImage::new(bytes),
            Err(response) => return response,
        },
        (None, None) => {
            return validation_error("Either 'artifact_id' or 'image_base64' is required")
        }
    };
    let last_frame = match payload.last_frame_base64.as_deref() {
        Some(encoded) => match decode_base64_field("last_frame_base64", encoded) {
            Ok(bytes) => Some(InputImage::new(bytes)),
            Err(response) => return response,
        },
        None => None,
    };

    let service = state.video.clone();
    let options = payload.options;
    let result = tokio::task::spawn_blocking(move || match last_frame {
        Some(last_frame) => {
            service.generate_from_frames(&first_frame, &last_frame, prompt.as_str(), &options)
        }
        None => service.generate_from_image(&first_frame, prompt.as_str(), &options),
    })
    .await;

    match result {
        Ok(Ok(video)) => {
            let video_base64 = encode_base64(video.video_bytes.as_slice());
            (
                StatusCode::OK,
                into_json(VideoResponse {
                    ok: true,
                    video,
                    mime_type: "video/mp4",
                    video_base64,
                }),
            )
        }
        Ok(Err(error)) => map_video_error(error),
        Err(join_error) => internal_error(format!("video task failed: {join_error}")),
    }
}
