use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::handler_utils::{
    decode_base64_field, encode_base64, internal_error, into_json, map_generation_error,
    not_found, validation_error, ApiObject,
};
use crate::api::server::AppState;
use crate::pipeline::generation::{GenerationRequest, GenerationResult};
use crate::pipeline::providers::InputImage;
use crate::pipeline::templates::VariableBindings;

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateInput {
    pub preset_id: String,
    pub image_base64: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub vars: VariableBindings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditInput {
    #[serde(default)]
    pub images_base64: Vec<String>,
    #[serde(default)]
    pub artifact_ids: Vec<String>,
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationResponse {
    ok: bool,
    result: GenerationResult,
    image_base64: String,
}

pub async fn generate_handler(
    State(state): State<AppState>,
    Json(payload): Json<GenerateInput>,
) -> ApiObject<Value> {
    let bytes = match decode_base64_field("image_base64", payload.image_base64.as_str()) {
        Ok(bytes) => bytes,
        Err(response) => return response,
    };
    let input_image = match payload.mime_type {
        Some(mime_type) if !mime_type.trim().is_empty() => {
            InputImage::with_mime_type(bytes, mime_type.trim())
        }
        _ => InputImage::new(bytes),
    };

    // Unselected variables fall back to each variable's first allowed value.
    let request = {
        let Ok(catalog) = state.presets.read() else {
            return internal_error("preset catalog lock poisoned");
        };
        GenerationRequest::from_catalog(
            &catalog,
            payload.preset_id.as_str(),
            input_image,
            &payload.vars,
        )
    };
    let request = match request {
        Ok(request) => request,
        Err(error) => return map_generation_error(error),
    };

    let service = state.generation.clone();
    let result = tokio::task::spawn_blocking(move || service.generate(&request)).await;

    match result {
        Ok(Ok(result)) => store_and_respond(&state, result),
        Ok(Err(error)) => map_generation_error(error),
        Err(join_error) => internal_error(format!("generation task failed: {join_error}")),
    }
}

pub async fn edit_handler(
    State(state): State<AppState>,
    Json(payload): Json<EditInput>,
) -> ApiObject<Value> {
    let command = payload.command.trim().to_string();
    if command.is_empty() {
        return validation_error("Field 'command' is required");
    }

    let mut images = Vec::with_capacity(payload.artifact_ids.len() + payload.images_base64.len());
    {
        let Ok(artifacts) = state.artifacts.read() else {
            return internal_error("artifact store lock poisoned");
        };
        for id in payload.artifact_ids.iter() {
            let Some(artifact) = artifacts.get(id.as_str()) else {
                return not_found(format!("Artifact not found: {id}"));
            };
            let bytes = artifact
                .processed
                .clone()
                .unwrap_or_else(|| artifact.result.raw_image_bytes.clone());
            images.push(InputImage::new(bytes));
        }
    }
    for encoded in payload.images_base64.iter() {
        match decode_base64_field("images_base64", encoded.as_str()) {
            Ok(bytes) => images.push(InputImage::new(bytes)),
            Err(response) => return response,
        }
    }

    let service = state.generation.clone();
    let result =
        tokio::task::spawn_blocking(move || service.edit(images.as_slice(), command.as_str()))
            .await;

    match result {
        Ok(Ok(result)) => store_and_respond(&state, result),
        Ok(Err(error)) => map_generation_error(error),
        Err(join_error) => internal_error(format!("edit task failed: {join_error}")),
    }
}

fn store_and_respond(state: &AppState, result: GenerationResult) -> ApiObject<Value> {
    let image_base64 = encode_base64(result.raw_image_bytes.as_slice());
    let Ok(mut artifacts) = state.artifacts.write() else {
        return internal_error("artifact store lock poisoned");
    };
    let stored = artifacts.push(result);
    (
        StatusCode::OK,
        into_json(GenerationResponse {
            ok: true,
            result: stored.result.clone(),
            image_base64,
        }),
    )
}
