use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::api::handler_utils::{
    decode_base64_field, encode_base64, internal_error, into_json, map_post_op_error, not_found,
    validation_error, ApiObject,
};
use crate::api::server::AppState;
use crate::pipeline::post_ops::{PostOpDescriptor, PostOpSpec};

#[derive(Debug, Clone, Deserialize)]
pub struct PostprocessInput {
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub ops: Vec<PostOpSpec>,
}

#[derive(Debug, Clone, Serialize)]
struct ListPostOpsResponse {
    ok: bool,
    count: usize,
    ops: Vec<PostOpDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
struct PostprocessResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_id: Option<String>,
    width: u32,
    height: u32,
    applied: Vec<String>,
    skipped: Vec<String>,
    image_base64: String,
}

pub async fn list_post_ops_handler(State(state): State<AppState>) -> ApiObject<Value> {
    let ops = state.post_ops.descriptors();
    (
        StatusCode::OK,
        into_json(ListPostOpsResponse {
            ok: true,
            count: ops.len(),
            ops,
        }),
    )
}

/// Runs a pipeline over an uploaded image or over a stored artifact's raw output.
///
/// Artifact runs always start from the unprocessed bytes, and the processed
/// rendition plus its pipeline are written back to the artifact.
pub async fn postprocess_handler(
    State(state): State<AppState>,
    Json(payload): Json<PostprocessInput>,
) -> ApiObject<Value> {
    let artifact_id = payload
        .artifact_id
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let source = match (artifact_id.as_deref(), payload.image_base64.as_deref()) {
        (Some(id), _) => {
            let Ok(artifacts) = state.artifacts.read() else {
                return internal_error("artifact store lock poisoned");
            };
            match artifacts.get(id) {
                Some(artifact) => artifact.result.raw_image_bytes.clone(),
                None => return not_found(format!("Artifact not found: {id}")),
            }
        }
        (None, Some(encoded)) => match decode_base64_field("image_base64", encoded) {
            Ok(bytes) => bytes,
            Err(response) => return response,
        },
        (None, None) => {
            return validation_error("Either 'artifact_id' or 'image_base64' is required")
        }
    };

    let registry = state.post_ops.clone();
    let ops = payload.ops;
    let task_ops = ops.clone();
    let result =
        tokio::task::spawn_blocking(move || registry.run(source.as_slice(), task_ops.as_slice()))
            .await;

    let run = match result {
        Ok(Ok(run)) => run,
        Ok(Err(error)) => return map_post_op_error(error),
        Err(join_error) => return internal_error(format!("postprocess task failed: {join_error}")),
    };
    info!(
        applied = run.applied.len(),
        skipped = run.skipped.len(),
        width = run.width,
        height = run.height,
        "postprocess pipeline finished"
    );

    if let Some(id) = artifact_id.as_deref() {
        let Ok(mut artifacts) = state.artifacts.write() else {
            return internal_error("artifact store lock poisoned");
        };
        if !artifacts.set_processed(id, run.bytes.clone(), ops) {
            return not_found(format!("Artifact not found: {id}"));
        }
    }

    (
        StatusCode::OK,
        into_json(PostprocessResponse {
            ok: true,
            artifact_id,
            width: run.width,
            height: run.height,
            applied: run.applied,
            skipped: run.skipped,
            image_base64: encode_base64(run.bytes.as_slice()),
        }),
    )
}
