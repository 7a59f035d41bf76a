use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::api::handler_utils::{
    internal_error, into_json, not_found, validation_error, ApiObject,
};
use crate::api::server::AppState;
use crate::pipeline::presets::Preset;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPresetsQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ListPresetsResponse {
    ok: bool,
    count: usize,
    presets: Vec<Preset>,
}

#[derive(Debug, Clone, Serialize)]
struct PresetResponse {
    ok: bool,
    preset: Preset,
}

/// Lists active presets; `?include_inactive=true` adds retired ones.
pub async fn list_presets_handler(
    State(state): State<AppState>,
    Query(query): Query<ListPresetsQuery>,
) -> ApiObject<Value> {
    let Ok(catalog) = state.presets.read() else {
        return internal_error("preset catalog lock poisoned");
    };
    let presets = catalog
        .list()
        .into_iter()
        .filter(|preset| query.include_inactive || preset.active)
        .cloned()
        .collect::<Vec<_>>();
    (
        StatusCode::OK,
        into_json(ListPresetsResponse {
            ok: true,
            count: presets.len(),
            presets,
        }),
    )
}

pub async fn get_preset_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiObject<Value> {
    let Ok(catalog) = state.presets.read() else {
        return internal_error("preset catalog lock poisoned");
    };
    match catalog.get(id.as_str()) {
        Some(preset) => (
            StatusCode::OK,
            into_json(PresetResponse {
                ok: true,
                preset: preset.clone(),
            }),
        ),
        None => not_found(format!("Preset not found: {id}")),
    }
}

/// Creates or replaces a preset; the path id wins over any id in the body.
pub async fn put_preset_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut preset): Json<Preset>,
) -> ApiObject<Value> {
    preset.id = id;
    let Ok(mut catalog) = state.presets.write() else {
        return internal_error("preset catalog lock poisoned");
    };
    match catalog.upsert(preset) {
        Ok(stored) => {
            info!(preset_id = %stored.id, version = stored.version, "preset saved");
            (
                StatusCode::OK,
                into_json(PresetResponse {
                    ok: true,
                    preset: stored.clone(),
                }),
            )
        }
        Err(error) => validation_error(error.to_string()),
    }
}

pub async fn delete_preset_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiObject<Value> {
    let Ok(mut catalog) = state.presets.write() else {
        return internal_error("preset catalog lock poisoned");
    };
    match catalog.remove(id.as_str()) {
        Some(removed) => {
            info!(preset_id = %removed.id, "preset removed");
            (
                StatusCode::OK,
                into_json(PresetResponse {
                    ok: true,
                    preset: removed,
                }),
            )
        }
        None => not_found(format!("Preset not found: {id}")),
    }
}
