use std::sync::Arc;

use thiserror::Error;

use crate::pipeline::inspect::sniff_mime_type;

pub mod gemini;
pub mod veo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl InputImage {
    /// Wraps raw bytes, guessing the MIME type from the signature.
    pub fn new(bytes: Vec<u8>) -> Self {
        let mime_type = sniff_mime_type(bytes.as_slice()).to_string();
        Self { bytes, mime_type }
    }

    pub fn with_mime_type(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InvocationOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct BackendInvocation<'a> {
    pub images: &'a [InputImage],
    pub prompt: &'a str,
    pub options: InvocationOptions,
}

/// The single image part returned by a backend, plus any text it sent along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub note: Option<String>,
}

impl BackendImage {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: Some(String::from("image/png")),
            note: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),
    #[error("http client init failed: {0}")]
    ClientInit(#[source] reqwest::Error),
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("API did not return an image. Response: {}", .note.as_deref().unwrap_or("No response"))]
    NoImage { note: Option<String> },
}

/// Submit a prompt plus input images, receive one image or fail.
pub trait ImageGenerationBackend: Send + Sync + 'static {
    fn model(&self) -> &str;

    fn invoke(&self, invocation: &BackendInvocation<'_>) -> Result<BackendImage, BackendError>;
}

pub type SharedImageBackend = Arc<dyn ImageGenerationBackend>;
