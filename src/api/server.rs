use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::error::ErrorKind;
use crate::api::handler_utils::error_response;
use crate::config::{AppConfig, DEFAULT_MAX_BODY_BYTES};
use crate::pipeline::artifacts::ArtifactStore;
use crate::pipeline::generation::GenerationService;
use crate::pipeline::post_ops::PostOpRegistry;
use crate::pipeline::presets::{PresetCatalog, PresetCatalogError};
use crate::pipeline::providers::gemini::GeminiImageBackend;
use crate::pipeline::providers::veo::VeoVideoBackend;
use crate::pipeline::video::VideoService;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub generation: GenerationService,
    pub video: VideoService,
    pub post_ops: Arc<PostOpRegistry>,
    pub presets: Arc<RwLock<PresetCatalog>>,
    pub artifacts: Arc<RwLock<ArtifactStore>>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(generation: GenerationService, video: VideoService, presets: PresetCatalog) -> Self {
        Self {
            service_name: "sprite-lab-core",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            generation,
            video,
            post_ops: Arc::new(PostOpRegistry::default()),
            presets: Arc::new(RwLock::new(presets)),
            artifacts: Arc::new(RwLock::new(ArtifactStore::default())),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Production wiring: Gemini image backend, Veo video backend and the
    /// preset file named in config (built-in presets otherwise).
    pub fn from_config(config: &AppConfig) -> Result<Self, PresetCatalogError> {
        let presets = match config.presets_path.as_deref() {
            Some(path) => PresetCatalog::load_from_path(path)?,
            None => PresetCatalog::builtin(),
        };
        let generation = GenerationService::new(Arc::new(GeminiImageBackend::new(&config.gemini)));
        let video = VideoService::new(
            Arc::new(VeoVideoBackend::new(&config.gemini)),
            config.video_poll_interval,
            config.video_max_polls,
        );
        Ok(Self::new(generation, video, presets).with_max_body_bytes(config.max_body_bytes))
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Presets(#[from] PresetCatalogError),
    #[error("invalid bind address '{bind}': {source}")]
    Bind {
        bind: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn build_router(config: &AppConfig) -> Result<Router, PresetCatalogError> {
    Ok(build_router_with_state(AppState::from_config(config)?))
}

pub fn build_router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/presets", get(crate::api::presets::list_presets_handler))
        .route(
            "/api/presets/{id}",
            get(crate::api::presets::get_preset_handler)
                .put(crate::api::presets::put_preset_handler)
                .delete(crate::api::presets::delete_preset_handler),
        )
        .route(
            "/api/post-ops",
            get(crate::api::postprocess::list_post_ops_handler),
        )
        .route(
            "/api/generate",
            post(crate::api::generation::generate_handler),
        )
        .route("/api/edit", post(crate::api::generation::edit_handler))
        .route(
            "/api/postprocess",
            post(crate::api::postprocess::postprocess_handler),
        )
        .route(
            "/api/artifacts",
            get(crate::api::artifacts::list_artifacts_handler),
        )
        .route(
            "/api/artifacts/{id}",
            get(crate::api::artifacts::get_artifact_handler)
                .delete(crate::api::artifacts::delete_artifact_handler),
        )
        .route("/api/video", post(crate::api::video::video_handler))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            envelope_oversized_body,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: AppConfig) -> Result<(), ServeError> {
    let addr: std::net::SocketAddr = config.bind.parse().map_err(|source| ServeError::Bind {
        bind: config.bind.clone(),
        source,
    })?;
    let app = build_router(&config)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        bind = %addr,
        image_model = %config.gemini.image_model,
        api_key_configured = config.gemini.api_key.is_some(),
        "starting sprite-lab-core HTTP surface"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "image_model": state.generation.model(),
        })),
    )
}

/// Rewrites the extractor's plain-text 413 into the JSON error envelope.
async fn envelope_oversized_body(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if response.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return response;
    }
    error_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::Validation,
        "payload_too_large",
        format!(
            "Request body exceeds the {} byte limit (SPRITE_LAB_MAX_BODY_BYTES)",
            state.max_body_bytes
        ),
    )
    .into_response()
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
