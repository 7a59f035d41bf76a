mod common;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use image::{Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use serde_json::json;

use common::{
    b64, floating_sprite, image_app, limited_app, noisy_image, send_json, unb64, FakeImageBackend,
};
use sprite_lab_core::pipeline::inspect::{decode, encode_png};
use sprite_lab_core::pipeline::providers::BackendImage;

#[tokio::test]
async fn lists_registered_post_ops() {
    let app = image_app(FakeImageBackend::default());
    let response = send_json(app, Method::GET, "/api/post-ops", Body::empty(), StatusCode::OK).await;

    assert_eq!(response["count"], json!(3));
    assert_eq!(
        response["ops"],
        json!([
            {"id": "chroma", "label": "Chroma key"},
            {"id": "resize", "label": "Resize (nearest)"},
            {"id": "trim", "label": "Trim transparent"}
        ])
    );
}

#[tokio::test]
async fn trims_then_resizes_uploaded_image() {
    let app = image_app(FakeImageBackend::default());
    let response = send_json(
        app,
        Method::POST,
        "/api/postprocess",
        Body::from(
            json!({
                "image_base64": b64(&floating_sprite(10, 10)),
                "ops": [
                    {"id": "trim"},
                    {"id": "sparkle"},
                    {"id": "resize", "params": {"scale": 4}}
                ]
            })
            .to_string(),
        ),
        StatusCode::OK,
    )
    .await;

    assert_eq!(response["width"], json!(4));
    assert_eq!(response["height"], json!(4));
    assert_eq!(response["applied"], json!(["trim", "resize"]));
    assert_eq!(response["skipped"], json!(["sparkle"]));
    let raster = decode(&unb64(&response["image_base64"])).expect("decode output");
    assert!(raster.pixels().all(|p| *p == Rgba([200, 40, 40, 255])));
}

#[tokio::test]
async fn chroma_keys_out_background_color() {
    let mut img = RgbaImage::from_pixel(3, 1, Rgba([255, 255, 255, 255]));
    img.put_pixel(1, 0, Rgba([0, 0, 255, 255]));
    let app = image_app(FakeImageBackend::default());

    let response = send_json(
        app,
        Method::POST,
        "/api/postprocess",
        Body::from(
            json!({
                "image_base64": b64(&encode_png(&img).expect("png")),
                "ops": [{"operationId": "chroma"}]
            })
            .to_string(),
        ),
        StatusCode::OK,
    )
    .await;

    let raster = decode(&unb64(&response["image_base64"])).expect("decode output");
    assert_eq!(raster.get_pixel(0, 0)[3], 0);
    assert_eq!(*raster.get_pixel(1, 0), Rgba([0, 0, 255, 255]));
    assert_eq!(raster.get_pixel(2, 0)[3], 0);
}

#[tokio::test]
async fn invalid_params_and_sources_are_rejected() {
    let app = image_app(FakeImageBackend::default());

    let bad_scale = send_json(
        app.clone(),
        Method::POST,
        "/api/postprocess",
        Body::from(
            json!({
                "image_base64": b64(&floating_sprite(4, 4)),
                "ops": [{"id": "resize", "params": {"scale": 0}}]
            })
            .to_string(),
        ),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(bad_scale["error_code"], json!("configuration_error"));

    let undecodable = send_json(
        app.clone(),
        Method::POST,
        "/api/postprocess",
        Body::from(json!({"image_base64": b64(b"plain text"), "ops": []}).to_string()),
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(undecodable["error_code"], json!("decode_error"));

    let no_source = send_json(
        app,
        Method::POST,
        "/api/postprocess",
        Body::from(r#"{"ops":[]}"#),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(
        no_source["error"],
        json!("Either 'artifact_id' or 'image_base64' is required")
    );
}

#[tokio::test]
async fn artifact_runs_start_from_raw_output_and_record_the_pipeline() {
    let backend =
        FakeImageBackend::with_responses(vec![Ok(BackendImage::png(floating_sprite(32, 32)))]);
    let app = image_app(backend);

    let generated = send_json(
        app.clone(),
        Method::POST,
        "/api/generate",
        Body::from(
            json!({
                "preset_id": "pixel-sprite-32",
                "image_base64": b64(&floating_sprite(8, 8))
            })
            .to_string(),
        ),
        StatusCode::OK,
    )
    .await;
    let id = generated["result"]["id"].as_str().expect("id").to_string();

    for scale in [2, 3] {
        let response = send_json(
            app.clone(),
            Method::POST,
            "/api/postprocess",
            Body::from(
                json!({
                    "artifact_id": id,
                    "ops": [{"id": "trim"}, {"id": "resize", "params": {"scale": scale}}]
                })
                .to_string(),
            ),
            StatusCode::OK,
        )
        .await;
        assert_eq!(response["artifact_id"], json!(id));
        assert_eq!(response["width"], json!(scale));
    }

    let artifact = send_json(
        app.clone(),
        Method::GET,
        &format!("/api/artifacts/{id}"),
        Body::empty(),
        StatusCode::OK,
    )
    .await;
    assert_eq!(artifact["artifact"]["processed"], json!(true));
    assert_eq!(artifact["artifact"]["pipeline"][1]["params"]["scale"], json!(3));
    let processed = decode(&unb64(&artifact["processed_base64"])).expect("processed png");
    assert_eq!(processed.dimensions(), (3, 3));
    let raw = decode(&unb64(&artifact["image_base64"])).expect("raw png");
    assert_eq!(raw.dimensions(), (32, 32));

    let missing = send_json(
        app,
        Method::GET,
        "/api/artifacts/nope",
        Body::empty(),
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(missing["error"], json!("Artifact not found: nope"));
}

#[tokio::test]
async fn accepts_full_size_uploads_beyond_two_megabytes() {
    let app = image_app(FakeImageBackend::default());
    let body = json!({
        "image_base64": b64(&noisy_image(1024, 1024)),
        "ops": [{"id": "trim"}]
    })
    .to_string();
    assert!(body.len() > 2 * 1024 * 1024);

    let response = send_json(app, Method::POST, "/api/postprocess", Body::from(body), StatusCode::OK).await;

    assert_eq!(response["ok"], json!(true));
    assert_eq!(response["width"], json!(1024));
    assert_eq!(response["height"], json!(1024));
}

#[tokio::test]
async fn oversized_body_is_rejected_with_error_envelope() {
    let app = limited_app(1024);
    let body = json!({
        "image_base64": b64(&noisy_image(64, 64)),
        "ops": [{"id": "trim"}]
    })
    .to_string();
    assert!(body.len() > 1024);

    let response = send_json(
        app,
        Method::POST,
        "/api/postprocess",
        Body::from(body),
        StatusCode::PAYLOAD_TOO_LARGE,
    )
    .await;

    assert_eq!(response["ok"], json!(false));
    assert_eq!(response["error_kind"], json!("validation"));
    assert_eq!(response["error_code"], json!("payload_too_large"));
    assert_eq!(
        response["error"],
        json!("Request body exceeds the 1024 byte limit (SPRITE_LAB_MAX_BODY_BYTES)")
    );
}
