use std::slice;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::pipeline::inspect::{dimensions, validate_alpha_and_size, InspectError};
use crate::pipeline::presets::{Preset, PresetCatalog};
use crate::pipeline::providers::{
    BackendError, BackendImage, BackendInvocation, InputImage, InvocationOptions,
    SharedImageBackend,
};
use crate::pipeline::templates::{
    amend_prompt, compose_prompt, render_preset, render_strict_addendum, VariableBindings,
};

pub const DEFAULT_TEMPERATURE: f64 = 0.7;

const EDIT_SYSTEM_PROMPT: &str = "You are an expert game asset editor. You modify and enhance game assets according to natural language commands.

Supported edits:
- Background removal and transparency
- Recoloring and palette changes
- Style transfer and enhancement
- Pose transfer between characters
- Combining and composing several assets
- Quality, lighting and shadow improvements

With multiple images:
- When combining, blend them naturally
- When transferring a pose, apply the pose from one image to the character in another
- When recoloring, keep the overall style and shading
- Keep pixel art as pixel art

Always output one high-quality game asset that fulfills the command, keep transparency where it suits a game asset, and keep the output at a size reasonable for games (typically 64x64 to 512x512 pixels).";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub input_image: InputImage,
    pub preset: Preset,
    pub bindings: VariableBindings,
}

impl GenerationRequest {
    /// Looks up an active preset and overlays `vars` on its default bindings.
    pub fn from_catalog(
        catalog: &PresetCatalog,
        preset_id: &str,
        input_image: InputImage,
        vars: &VariableBindings,
    ) -> Result<Self, GenerationError> {
        let preset = catalog
            .get(preset_id)
            .filter(|preset| preset.active)
            .cloned()
            .ok_or_else(|| {
                GenerationError::Configuration(format!("Preset not found: {preset_id}"))
            })?;
        let bindings = preset.bindings_with_defaults(vars);
        Ok(Self {
            input_image,
            preset,
            bindings,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub id: String,
    #[serde(skip)]
    pub raw_image_bytes: Vec<u8>,
    pub prompt_used: String,
    /// Decoded from `raw_image_bytes`, never taken from the request.
    pub width: u32,
    pub height: u32,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub attempts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generated image could not be decoded: {0}")]
    Decode(#[source] InspectError),
    #[error("image generation call failed: {0}")]
    Transport(#[source] BackendError),
    #[error("{0}")]
    Configuration(String),
}

/// Which call of a `generate` run produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    StrictRetry,
}

impl Attempt {
    fn number(self) -> u8 {
        match self {
            Self::First => 1,
            Self::StrictRetry => 2,
        }
    }
}

/// Drives prompt rendering, the backend call, validation and the strict retry.
#[derive(Clone)]
pub struct GenerationService {
    backend: SharedImageBackend,
}

impl GenerationService {
    pub fn new(backend: SharedImageBackend) -> Self {
        Self { backend }
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Generates one image, retrying once with a strict prompt when the first
    /// output misses the preset's size/alpha constraints.
    ///
    /// The retry's output is returned without being validated again. Backend
    /// failures are never retried.
    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
        let preset = &request.preset;
        let prompt = render_preset(preset, &request.bindings).compose();
        let options = invocation_options(preset);

        // Rendered before the first call so a missing W/H fails without a network round trip.
        let strict = match preset.constraints.target_size {
            Some(size) => {
                let addendum = render_strict_addendum(preset, &request.bindings)
                    .map_err(|e| GenerationError::Configuration(e.to_string()))?;
                Some((size, addendum))
            }
            None => None,
        };

        let first = self.invoke(slice::from_ref(&request.input_image), prompt.as_str(), options)?;

        let Some(((target_width, target_height), addendum)) = strict else {
            return self.build_result(first, prompt, Attempt::First);
        };

        if validate_alpha_and_size(
            first.bytes.as_slice(),
            target_width,
            target_height,
            preset.constraints.transparent_bg,
        ) {
            info!(preset_id = %preset.id, attempt = 1, "generation passed validation");
            return self.build_result(first, prompt, Attempt::First);
        }

        warn!(
            preset_id = %preset.id,
            target_width,
            target_height,
            "first attempt failed validation, retrying with strict prompt"
        );
        let retry_prompt = amend_prompt(prompt.as_str(), addendum.as_str());
        let second = self.invoke(
            slice::from_ref(&request.input_image),
            retry_prompt.as_str(),
            options,
        )?;
        self.build_result(second, retry_prompt, Attempt::StrictRetry)
    }

    /// Applies a free-text edit to one or more images in a single backend call.
    ///
    /// Edits have no target geometry, so the output is never validated.
    pub fn edit(&self, images: &[InputImage], command: &str) -> Result<GenerationResult, GenerationError> {
        if images.is_empty() {
            return Err(GenerationError::Configuration(String::from(
                "No input images provided",
            )));
        }
        let prompt = edit_prompt(command);
        let options = InvocationOptions {
            temperature: Some(DEFAULT_TEMPERATURE),
            ..InvocationOptions::default()
        };
        info!(images = images.len(), "submitting edit request");
        let response = self.invoke(images, prompt.as_str(), options)?;
        self.build_result(response, prompt, Attempt::First)
    }

    fn invoke(
        &self,
        images: &[InputImage],
        prompt: &str,
        options: InvocationOptions,
    ) -> Result<BackendImage, GenerationError> {
        self.backend
            .invoke(&BackendInvocation {
                images,
                prompt,
                options,
            })
            .map_err(GenerationError::Transport)
    }

    fn build_result(
        &self,
        response: BackendImage,
        prompt_used: String,
        attempt: Attempt,
    ) -> Result<GenerationResult, GenerationError> {
        let (width, height) =
            dimensions(response.bytes.as_slice()).map_err(GenerationError::Decode)?;
        Ok(GenerationResult {
            id: Uuid::new_v4().to_string(),
            raw_image_bytes: response.bytes,
            prompt_used,
            width,
            height,
            model: self.backend.model().to_string(),
            created_at: Utc::now(),
            attempts: attempt.number(),
            note: response.note,
        })
    }
}

fn invocation_options(preset: &Preset) -> InvocationOptions {
    let gen = preset.gen.as_ref();
    InvocationOptions {
        temperature: Some(preset.temperature().unwrap_or(DEFAULT_TEMPERATURE)),
        top_p: gen.and_then(|g| g.top_p),
        top_k: gen.and_then(|g| g.top_k),
    }
}

pub fn edit_prompt(command: &str) -> String {
    let user = format!(
        "Please edit these game assets with the following instruction: {command}\n\nProcess the provided images and create a single edited result that fulfills this command."
    );
    compose_prompt(EDIT_SYSTEM_PROMPT, user.as_str())
}
