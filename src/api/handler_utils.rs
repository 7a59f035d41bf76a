use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::api::error::ErrorKind;
use crate::pipeline::generation::GenerationError;
use crate::pipeline::inspect::InspectError;
use crate::pipeline::post_ops::PostOpError;
use crate::pipeline::providers::BackendError;
use crate::pipeline::video::VideoError;

pub type ApiObject<T> = (StatusCode, Json<T>);

#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
    error_kind: ErrorKind,
    error_code: String,
}

pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
) -> ApiObject<Value> {
    (
        status,
        into_json(ErrorResponse {
            ok: false,
            error: message.into(),
            error_kind: kind,
            error_code: code.into(),
        }),
    )
}

pub fn validation_error(message: impl Into<String>) -> ApiObject<Value> {
    error_response(
        StatusCode::BAD_REQUEST,
        ErrorKind::Validation,
        "validation_error",
        message,
    )
}

pub fn configuration_error(message: impl Into<String>) -> ApiObject<Value> {
    error_response(
        StatusCode::BAD_REQUEST,
        ErrorKind::Validation,
        "configuration_error",
        message,
    )
}

pub fn not_found(message: impl Into<String>) -> ApiObject<Value> {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        "not_found",
        message,
    )
}

pub fn internal_error(message: impl Into<String>) -> ApiObject<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
    )
}

pub fn map_generation_error(err: GenerationError) -> ApiObject<Value> {
    match err {
        GenerationError::Configuration(message) => configuration_error(message),
        GenerationError::Transport(BackendError::MissingApiKey(key)) => {
            configuration_error(format!("Image backend is not configured: set {key}"))
        }
        GenerationError::Transport(source) => error_response(
            StatusCode::BAD_GATEWAY,
            ErrorKind::Provider,
            "transport_error",
            source.to_string(),
        ),
        GenerationError::Decode(source) => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Provider,
            "decode_error",
            format!("Generated image could not be decoded: {source}"),
        ),
    }
}

pub fn map_post_op_error(err: PostOpError) -> ApiObject<Value> {
    match err {
        PostOpError::InvalidParams { .. } => configuration_error(err.to_string()),
        PostOpError::Image(InspectError::Decode(source)) => error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Validation,
            "decode_error",
            format!("Source image could not be decoded: {source}"),
        ),
        PostOpError::Image(source) => internal_error(source.to_string()),
    }
}

pub fn map_video_error(err: VideoError) -> ApiObject<Value> {
    match err {
        VideoError::InvalidOptions(message) => configuration_error(message),
        VideoError::MissingApiKey(key) => {
            configuration_error(format!("Video backend is not configured: set {key}"))
        }
        VideoError::TimedOut { .. } => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Provider,
            "video_timeout",
            err.to_string(),
        ),
        VideoError::Transport(_) | VideoError::OperationFailed(_) | VideoError::NoVideo => {
            error_response(
                StatusCode::BAD_GATEWAY,
                ErrorKind::Provider,
                "transport_error",
                err.to_string(),
            )
        }
    }
}

/// Decodes a base64 request field, tolerating a `data:<mime>;base64,` prefix.
pub fn decode_base64_field(field: &str, value: &str) -> Result<Vec<u8>, ApiObject<Value>> {
    let trimmed = value.trim();
    let payload = match trimmed.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => trimmed,
    };
    if payload.is_empty() {
        return Err(validation_error(format!("Field '{field}' is required")));
    }
    BASE64_STANDARD
        .decode(payload.as_bytes())
        .map_err(|_| validation_error(format!("Field '{field}' is not valid base64")))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

pub fn into_json(payload: impl Serialize) -> Json<Value> {
    Json(serde_json::to_value(payload).expect("api payload should serialize"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;

    #[test]
    fn configuration_errors_map_to_bad_request() {
        let (status, payload) = map_generation_error(GenerationError::Configuration(
            String::from("Preset not found: ghost"),
        ));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.0["ok"], json!(false));
        assert_eq!(payload.0["error"], json!("Preset not found: ghost"));
        assert_eq!(payload.0["error_kind"], json!("validation"));
        assert_eq!(payload.0["error_code"], json!("configuration_error"));
    }

    #[test]
    fn transport_errors_map_to_bad_gateway() {
        let (status, payload) = map_generation_error(GenerationError::Transport(
            BackendError::NoImage {
                note: Some(String::from("refused")),
            },
        ));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(payload.0["error_kind"], json!("provider"));
        assert_eq!(
            payload.0["error"],
            json!("API did not return an image. Response: refused")
        );

        let (status, payload) =
            map_generation_error(GenerationError::Transport(BackendError::MissingApiKey(
                "GEMINI_API_KEY",
            )));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(payload.0["error_code"], json!("configuration_error"));
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let (status, payload) = internal_error("sensitive detail");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(payload.0["error"], json!("Internal server error"));
        assert_eq!(payload.0["error_kind"], json!("infra"));
        assert_eq!(payload.0["error_code"], json!("internal_error"));
    }

    #[test]
    fn base64_fields_accept_data_urls() {
        assert_eq!(
            decode_base64_field("image_base64", "data:image/png;base64,AQID").expect("decode"),
            vec![1, 2, 3]
        );
        assert_eq!(
            decode_base64_field("image_base64", " AQID ").expect("decode"),
            vec![1, 2, 3]
        );
        let (status, payload) =
            decode_base64_field("image_base64", "%%%").expect_err("invalid base64");
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            payload.0["error"],
            json!("Field 'image_base64' is not valid base64")
        );
        assert!(decode_base64_field("image_base64", "").is_err());
    }
}
