mod common;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{
    b64, floating_sprite, image_app, opaque_image, send_json, unb64, FakeImageBackend,
};
use sprite_lab_core::pipeline::providers::{BackendError, BackendImage};

fn generate_body(preset_id: &str) -> Body {
    Body::from(
        json!({
            "preset_id": preset_id,
            "image_base64": b64(&floating_sprite(8, 8)),
            "vars": {"SUBJECT": "slime"}
        })
        .to_string(),
    )
}

#[tokio::test]
async fn health_reports_service_and_model() {
    let app = image_app(FakeImageBackend::default());
    let response = send_json(app, Method::GET, "/health", Body::empty(), StatusCode::OK).await;
    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["service"], json!("sprite-lab-core"));
    assert_eq!(response["image_model"], json!("fake-image-model"));
}

#[tokio::test]
async fn valid_first_attempt_is_returned_and_stored() {
    let sprite = floating_sprite(32, 32);
    let backend = FakeImageBackend::with_responses(vec![Ok(BackendImage::png(sprite.clone()))]);
    let app = image_app(backend.clone());

    let response = send_json(
        app.clone(),
        Method::POST,
        "/api/generate",
        generate_body("pixel-sprite-32"),
        StatusCode::OK,
    )
    .await;

    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["result"]["width"], json!(32));
    assert_eq!(response["result"]["height"], json!(32));
    assert_eq!(response["result"]["attempts"], json!(1));
    assert_eq!(unb64(&response["image_base64"]), sprite);

    let seen = backend.take_seen();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].prompt.contains("16-bit slime sprite facing right"));
    assert!(seen[0].prompt.contains("at most 16 colors"));

    let id = response["result"]["id"].as_str().expect("result id");
    let listed = send_json(app.clone(), Method::GET, "/api/artifacts", Body::empty(), StatusCode::OK).await;
    assert_eq!(listed["count"], json!(1));
    assert_eq!(listed["artifacts"][0]["id"], json!(id));
    assert_eq!(listed["artifacts"][0]["processed"], json!(false));

    let deleted = send_json(
        app.clone(),
        Method::DELETE,
        format!("/api/artifacts/{id}").as_str(),
        Body::empty(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(deleted["id"], json!(id));
    assert_eq!(deleted["remaining"], json!(0));
    send_json(
        app,
        Method::GET,
        format!("/api/artifacts/{id}").as_str(),
        Body::empty(),
        StatusCode::NOT_FOUND,
    )
    .await;
}

#[tokio::test]
async fn invalid_first_attempt_retries_with_strict_prompt() {
    let backend = FakeImageBackend::with_responses(vec![
        Ok(BackendImage::png(opaque_image(64, 64))),
        Ok(BackendImage::png(opaque_image(30, 30))),
    ]);
    let app = image_app(backend.clone());

    let response = send_json(
        app,
        Method::POST,
        "/api/generate",
        generate_body("pixel-sprite-32"),
        StatusCode::OK,
    )
    .await;

    assert_eq!(response["result"]["attempts"], json!(2));
    assert_eq!(response["result"]["width"], json!(30));
    let prompt_used = response["result"]["prompt_used"].as_str().expect("prompt");
    assert!(prompt_used.contains("STRICT"));
    assert!(prompt_used.contains("32x32"));

    let seen = backend.take_seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].prompt, prompt_used);
    assert!(seen[1].prompt.starts_with(seen[0].prompt.as_str()));
}

#[tokio::test]
async fn unknown_preset_is_a_configuration_error() {
    let backend = FakeImageBackend::default();
    let app = image_app(backend.clone());

    let response = send_json(
        app,
        Method::POST,
        "/api/generate",
        generate_body("ghost"),
        StatusCode::BAD_REQUEST,
    )
    .await;

    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error"], json!("Preset not found: ghost"));
    assert_eq!(response["error_code"], json!("configuration_error"));
    assert!(backend.take_seen().is_empty());
}

#[tokio::test]
async fn invalid_base64_is_a_validation_error() {
    let app = image_app(FakeImageBackend::default());
    let response = send_json(
        app,
        Method::POST,
        "/api/generate",
        Body::from(r#"{"preset_id":"pixel-sprite-32","image_base64":"not base64!"}"#),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(response["error_kind"], json!("validation"));
    assert_eq!(response["error_code"], json!("validation_error"));
}

#[tokio::test]
async fn backend_failure_maps_to_bad_gateway_without_retry() {
    let backend = FakeImageBackend::with_responses(vec![Err(BackendError::NoImage {
        note: Some(String::from("I cannot draw that.")),
    })]);
    let app = image_app(backend.clone());

    let response = send_json(
        app,
        Method::POST,
        "/api/generate",
        generate_body("pixel-sprite-32"),
        StatusCode::BAD_GATEWAY,
    )
    .await;

    assert_eq!(response["error_kind"], json!("provider"));
    assert_eq!(response["error_code"], json!("transport_error"));
    assert_eq!(
        response["error"],
        json!("API did not return an image. Response: I cannot draw that.")
    );
    assert_eq!(backend.take_seen().len(), 1);
}

#[tokio::test]
async fn undecodable_backend_bytes_are_a_decode_error() {
    let backend =
        FakeImageBackend::with_responses(vec![Ok(BackendImage::png(b"not an image".to_vec()))]);
    let app = image_app(backend);

    let response = send_json(
        app,
        Method::POST,
        "/api/generate",
        generate_body("painted-background"),
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(response["error_code"], json!("decode_error"));
}

#[tokio::test]
async fn edit_combines_artifacts_and_uploads_in_one_call() {
    let backend = FakeImageBackend::with_responses(vec![
        Ok(BackendImage::png(floating_sprite(32, 32))),
        Ok(BackendImage::png(opaque_image(200, 120))),
    ]);
    let app = image_app(backend.clone());

    let generated = send_json(
        app.clone(),
        Method::POST,
        "/api/generate",
        generate_body("pixel-sprite-32"),
        StatusCode::OK,
    )
    .await;
    let artifact_id = generated["result"]["id"].as_str().expect("id").to_string();
    backend.take_seen();

    let edited = send_json(
        app.clone(),
        Method::POST,
        "/api/edit",
        Body::from(
            json!({
                "artifact_ids": [artifact_id],
                "images_base64": [b64(&floating_sprite(16, 16))],
                "command": "combine them"
            })
            .to_string(),
        ),
        StatusCode::OK,
    )
    .await;

    assert_eq!(edited["result"]["width"], json!(200));
    assert_eq!(edited["result"]["height"], json!(120));
    assert_eq!(edited["result"]["attempts"], json!(1));
    let seen = backend.take_seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].image_count, 2);
    assert!(seen[0].prompt.contains("following instruction: combine them"));

    let listed = send_json(app, Method::GET, "/api/artifacts?limit=1", Body::empty(), StatusCode::OK).await;
    assert_eq!(listed["count"], json!(1));
    assert_eq!(listed["artifacts"][0]["id"], edited["result"]["id"]);
}

#[tokio::test]
async fn edit_requires_command_and_images() {
    let backend = FakeImageBackend::default();
    let app = image_app(backend.clone());

    let missing_command = send_json(
        app.clone(),
        Method::POST,
        "/api/edit",
        Body::from(json!({"images_base64": [b64(&floating_sprite(4, 4))]}).to_string()),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(missing_command["error"], json!("Field 'command' is required"));

    let no_images = send_json(
        app.clone(),
        Method::POST,
        "/api/edit",
        Body::from(r#"{"command":"recolor"}"#),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(no_images["error_code"], json!("configuration_error"));
    assert_eq!(no_images["error"], json!("No input images provided"));

    let unknown_artifact = send_json(
        app,
        Method::POST,
        "/api/edit",
        Body::from(r#"{"command":"recolor","artifact_ids":["missing"]}"#),
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(unknown_artifact["error"], json!("Artifact not found: missing"));
    assert!(backend.take_seen().is_empty());
}

#[tokio::test]
async fn sized_preset_without_dimension_bindings_fails_before_calling_backend() {
    let backend = FakeImageBackend::with_responses(vec![Ok(BackendImage::png(opaque_image(3, 3)))]);
    let app = image_app(backend.clone());
    let preset = json!({
        "system": "You draw icons.",
        "userTemplate": "Draw a {SUBJECT}.",
        "constraints": {"targetSize": [8, 8]}
    });
    send_json(
        app.clone(),
        Method::PUT,
        "/api/presets/icon-8",
        Body::from(preset.to_string()),
        StatusCode::OK,
    )
    .await;

    let response = send_json(
        app,
        Method::POST,
        "/api/generate",
        generate_body("icon-8"),
        StatusCode::BAD_REQUEST,
    )
    .await;

    assert_eq!(response["error_code"], json!("configuration_error"));
    assert_eq!(
        response["error"],
        json!("preset 'icon-8' needs a 'W' binding for its strict retry prompt")
    );
    assert!(backend.take_seen().is_empty());
}
