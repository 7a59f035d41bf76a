use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::handler_utils::{encode_base64, internal_error, into_json, not_found, ApiObject};
use crate::api::server::AppState;
use crate::pipeline::artifacts::{Artifact, DEFAULT_ARTIFACT_CAPACITY};
use crate::pipeline::generation::GenerationResult;
use crate::pipeline::post_ops::PostOpSpec;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListArtifactsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct ArtifactSummary {
    #[serde(flatten)]
    result: GenerationResult,
    processed: bool,
    pipeline: Vec<PostOpSpec>,
}

impl From<&Artifact> for ArtifactSummary {
    fn from(artifact: &Artifact) -> Self {
        Self {
            result: artifact.result.clone(),
            processed: artifact.processed.is_some(),
            pipeline: artifact.pipeline.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ListArtifactsResponse {
    ok: bool,
    count: usize,
    artifacts: Vec<ArtifactSummary>,
}

#[derive(Debug, Clone, Serialize)]
struct ArtifactResponse {
    ok: bool,
    artifact: ArtifactSummary,
    image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_base64: Option<String>,
}

pub async fn list_artifacts_handler(
    State(state): State<AppState>,
    Query(query): Query<ListArtifactsQuery>,
) -> ApiObject<Value> {
    let limit = query.limit.unwrap_or(DEFAULT_ARTIFACT_CAPACITY);
    let Ok(store) = state.artifacts.read() else {
        return internal_error("artifact store lock poisoned");
    };
    let artifacts = store
        .latest(limit)
        .into_iter()
        .map(ArtifactSummary::from)
        .collect::<Vec<_>>();
    (
        StatusCode::OK,
        into_json(ListArtifactsResponse {
            ok: true,
            count: artifacts.len(),
            artifacts,
        }),
    )
}

pub async fn get_artifact_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiObject<Value> {
    let Ok(store) = state.artifacts.read() else {
        return internal_error("artifact store lock poisoned");
    };
    let Some(artifact) = store.get(id.as_str()) else {
        return not_found(format!("Artifact not found: {id}"));
    };
    (
        StatusCode::OK,
        into_json(ArtifactResponse {
            ok: true,
            artifact: ArtifactSummary::from(artifact),
            image_base64: encode_base64(artifact.result.raw_image_bytes.as_slice()),
            processed_base64: artifact.processed.as_deref().map(encode_base64),
        }),
    )
}

pub async fn delete_artifact_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiObject<Value> {
    let Ok(mut store) = state.artifacts.write() else {
        return internal_error("artifact store lock poisoned");
    };
    match store.remove(id.as_str()) {
        Some(removed) => (
            StatusCode::OK,
            into_json(json!({ "ok": true, "id": removed.id(), "remaining": store.len() })),
        ),
        None => not_found(format!("Artifact not found: {id}")),
    }
}
