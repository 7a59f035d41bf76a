use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::pipeline::providers::InputImage;

const MIN_DURATION_SECONDS: u32 = 5;
const MAX_DURATION_SECONDS: u32 = 8;
const FRAMES_PROMPT_SUFFIX: &str = "(transition from the provided image to create a video sequence)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }

    pub fn resolution(self) -> &'static str {
        match self {
            Self::Landscape => "1280x720",
            Self::Portrait => "720x1280",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoGenerationOptions {
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u32,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for VideoGenerationOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: AspectRatio::default(),
            duration_seconds: default_duration_seconds(),
            model: None,
        }
    }
}

fn default_duration_seconds() -> u32 {
    MAX_DURATION_SECONDS
}

#[derive(Debug, Clone, Copy)]
pub struct VideoStartRequest<'a> {
    pub image: &'a InputImage,
    pub prompt: &'a str,
    pub options: &'a VideoGenerationOptions,
}

/// Snapshot of a long-running video job as last reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub error: Option<String>,
    pub video_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoGenerationResult {
    pub id: String,
    #[serde(skip)]
    pub video_bytes: Vec<u8>,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub resolution: String,
}

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("invalid video options: {0}")]
    InvalidOptions(String),
    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),
    #[error("video transport error: {0}")]
    Transport(String),
    #[error("Video generation failed: {0}")]
    OperationFailed(String),
    #[error("No video was generated")]
    NoVideo,
    #[error("video operation '{name}' still running after {polls} polls")]
    TimedOut { name: String, polls: u32 },
}

pub trait VideoBackend: Send + Sync + 'static {
    fn start(&self, request: &VideoStartRequest<'_>) -> Result<VideoOperation, VideoError>;

    fn poll(&self, operation: &VideoOperation) -> Result<VideoOperation, VideoError>;

    fn download(&self, uri: &str) -> Result<Vec<u8>, VideoError>;
}

pub type SharedVideoBackend = Arc<dyn VideoBackend>;

/// Starts a video job and polls it until it finishes, fails or runs out of polls.
#[derive(Clone)]
pub struct VideoService {
    backend: SharedVideoBackend,
    poll_interval: Duration,
    max_polls: u32,
}

impl VideoService {
    pub fn new(backend: SharedVideoBackend, poll_interval: Duration, max_polls: u32) -> Self {
        Self {
            backend,
            poll_interval,
            max_polls,
        }
    }

    pub fn generate_from_image(
        &self,
        image: &InputImage,
        prompt: &str,
        options: &VideoGenerationOptions,
    ) -> Result<VideoGenerationResult, VideoError> {
        self.run(image, prompt.to_string(), options)
    }

    /// First/last frame variant. The backend accepts a single image, so only
    /// the first frame is sent and the prompt asks for the transition.
    pub fn generate_from_frames(
        &self,
        first_frame: &InputImage,
        last_frame: &InputImage,
        prompt: &str,
        options: &VideoGenerationOptions,
    ) -> Result<VideoGenerationResult, VideoError> {
        debug!(
            last_frame_bytes = last_frame.bytes.len(),
            "last frame is not forwarded to the video backend"
        );
        self.run(first_frame, format!("{prompt} {FRAMES_PROMPT_SUFFIX}"), options)
    }

    fn run(
        &self,
        image: &InputImage,
        prompt: String,
        options: &VideoGenerationOptions,
    ) -> Result<VideoGenerationResult, VideoError> {
        validate_options(options)?;
        let mut operation = self.backend.start(&VideoStartRequest {
            image,
            prompt: prompt.as_str(),
            options,
        })?;
        info!(operation = %operation.name, "video generation started");

        let mut polls = 0u32;
        while !operation.done {
            if polls >= self.max_polls {
                return Err(VideoError::TimedOut {
                    name: operation.name,
                    polls,
                });
            }
            std::thread::sleep(self.poll_interval);
            operation = self.backend.poll(&operation)?;
            polls += 1;
            debug!(operation = %operation.name, polls, done = operation.done, "polled video operation");
        }

        if let Some(message) = operation.error {
            return Err(VideoError::OperationFailed(message));
        }
        let uri = operation.video_uri.ok_or(VideoError::NoVideo)?;
        let video_bytes = self.backend.download(uri.as_str())?;
        info!(bytes = video_bytes.len(), polls, "video generation completed");

        Ok(VideoGenerationResult {
            id: Uuid::new_v4().to_string(),
            video_bytes,
            prompt,
            created_at: Utc::now(),
            duration_seconds: options.duration_seconds,
            resolution: options.aspect_ratio.resolution().to_string(),
        })
    }
}

fn validate_options(options: &VideoGenerationOptions) -> Result<(), VideoError> {
    if !(MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&options.duration_seconds) {
        return Err(VideoError::InvalidOptions(format!(
            "duration_seconds must be within {MIN_DURATION_SECONDS}..={MAX_DURATION_SECONDS}, got {}",
            options.duration_seconds
        )));
    }
    Ok(())
}
