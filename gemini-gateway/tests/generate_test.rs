mod common;

use common::{TestApp, test_config};
use gemini_gateway::models::{ArtifactHandle, GenerationResponse};
use gemini_gateway::services::session::mock::MOCK_PNG;
use gemini_gateway::services::session::{BackendError, Credentials, MockBackend};
use gemini_gateway::startup::Application;
use reqwest::multipart;
use std::sync::atomic::Ordering;

fn png_part(name: &str, bytes: &[u8]) -> multipart::Part {
    multipart::Part::bytes(bytes.to_vec())
        .file_name(name.to_string())
        .mime_str("image/png")
        .unwrap()
}

#[tokio::test]
async fn generate_text_returns_backend_text() {
    let app = TestApp::spawn().await;

    let response = app.post_prompt("/generate-text", "hello there").await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["text"], "Mock response for: hello there");
    app.cleanup().await;
}

#[tokio::test]
async fn generate_text_surfaces_upstream_failure_as_500() {
    let backend = MockBackend::scripted(
        (0..3)
            .map(|_| Err(BackendError::Transport("connection reset".to_string())))
            .collect(),
    );
    let calls = backend.call_log();
    let app = TestApp::spawn_with(backend).await;

    let response = app.post_prompt("/generate-text", "hello").await;

    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("connection reset"));
    assert_eq!(calls.lock().unwrap().len(), 3);
    app.cleanup().await;
}

#[tokio::test]
async fn binary_route_returns_inline_bytes_as_png() {
    let app = TestApp::spawn_with(MockBackend::echo()).await;

    let response = app
        .post_prompt("/generate-image-binary", "exact bytes please")
        .await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["content-type"], "image/png");
    let body = response.bytes().await.unwrap();
    assert_eq!(&body[..], b"exact bytes please");
    app.cleanup().await;
}

#[tokio::test]
async fn binary_route_gives_up_after_three_attempts() {
    let backend = MockBackend::scripted(vec![]);
    let calls = backend.call_log();
    let app = TestApp::spawn_with(backend).await;

    let response = app.post_prompt("/generate-image-binary", "a cat").await;

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(
        body["detail"]
            .as_str()
            .unwrap()
            .starts_with("No image generated after 3 attempt(s)")
    );
    assert_eq!(calls.lock().unwrap().len(), 3);
    app.cleanup().await;
}

#[tokio::test]
async fn binary_route_recovers_on_third_attempt() {
    let backend = MockBackend::scripted(vec![
        Ok(GenerationResponse::text("thinking")),
        Ok(GenerationResponse::text("still thinking")),
        Ok(GenerationResponse::text("done").with_artifact(ArtifactHandle::inline(MOCK_PNG))),
    ]);
    let calls = backend.call_log();
    let app = TestApp::spawn_with(backend).await;

    let response = app.post_prompt("/generate-image-binary", "a cat").await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(&response.bytes().await.unwrap()[..], MOCK_PNG);
    assert_eq!(calls.lock().unwrap().len(), 3);
    app.cleanup().await;
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app.post_prompt("/generate-image-binary", "").await;

    assert_eq!(response.status().as_u16(), 422);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("Prompt is required"));
    app.cleanup().await;
}

#[tokio::test]
async fn generate_with_images_stages_uploads_and_cleans_up() {
    let backend = MockBackend::new();
    let calls = backend.call_log();
    let app = TestApp::spawn_with(backend).await;

    let form = multipart::Form::new()
        .text("prompt", "make it blue")
        .part("images", png_part("first.png", &[1, 2, 3]))
        .part("images", png_part("second.png", &[4, 5, 6]));

    let response = app
        .client
        .post(format!("{}/generate-with-images", app.address))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(&response.bytes().await.unwrap()[..], MOCK_PNG);

    {
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].prompt, "make it blue");
        assert_eq!(calls[0].files.len(), 2);
        assert!(calls[0].files_present);
        assert!(calls[0].files.iter().all(|path| !path.exists()));
    }
    assert_eq!(app.staged_files().await, 0);
    app.cleanup().await;
}

#[tokio::test]
async fn generate_with_images_falls_back_to_text() {
    let app = TestApp::spawn_with(MockBackend::scripted(vec![
        Ok(GenerationResponse::text("I cannot edit that")),
        Ok(GenerationResponse::text("I cannot edit that")),
        Ok(GenerationResponse::text("Here is a description instead")),
    ]))
    .await;

    let form = multipart::Form::new()
        .text("prompt", "edit this")
        .part("images", png_part("input.png", &[1]));

    let response = app
        .client
        .post(format!("{}/generate-with-images", app.address))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["text"], "Here is a description instead");
    assert_eq!(app.staged_files().await, 0);
    app.cleanup().await;
}

#[tokio::test]
async fn generate_with_images_without_artifact_or_text_is_400() {
    let app = TestApp::spawn_with(MockBackend::scripted(
        (0..3).map(|_| Ok(GenerationResponse::text(""))).collect(),
    ))
    .await;

    let form = multipart::Form::new()
        .text("prompt", "edit this")
        .part("images", png_part("input.png", &[1]));

    let response = app
        .client
        .post(format!("{}/generate-with-images", app.address))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(app.staged_files().await, 0);
    app.cleanup().await;
}

#[tokio::test]
async fn generate_with_images_requires_prompt() {
    let app = TestApp::spawn().await;

    let form = multipart::Form::new().part("images", png_part("input.png", &[1]));

    let response = app
        .client
        .post(format!("{}/generate-with-images", app.address))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("Missing prompt"));
    app.cleanup().await;
}

#[tokio::test]
async fn generate_image_saves_file() {
    let backend = MockBackend::new();
    let calls = backend.call_log();
    let app = TestApp::spawn_with(backend).await;

    let response = app.post_prompt("/generate-image", "a cat in space").await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let filename = body["filename"].as_str().unwrap();
    assert!(filename.starts_with("image_") && filename.ends_with(".png"));

    let full_path = std::path::PathBuf::from(body["full_path"].as_str().unwrap());
    assert!(full_path.is_absolute());
    assert_eq!(tokio::fs::read(&full_path).await.unwrap(), MOCK_PNG);
    assert!(app.images_dir.join(filename).exists());

    assert_eq!(
        calls.lock().unwrap()[0].prompt,
        "Generate an image of: a cat in space"
    );
    app.cleanup().await;
}

#[tokio::test]
async fn concurrent_image_saves_get_distinct_files() {
    let backend = MockBackend::echo().with_latency(std::time::Duration::from_millis(20));
    let app = TestApp::spawn_with(backend).await;

    let (first, second) = tokio::join!(
        app.post_prompt("/generate-image", "first"),
        app.post_prompt("/generate-image", "second"),
    );
    assert_eq!(first.status().as_u16(), 200);
    assert_eq!(second.status().as_u16(), 200);
    let first: serde_json::Value = first.json().await.unwrap();
    let second: serde_json::Value = second.json().await.unwrap();

    assert_ne!(first["filename"], second["filename"]);
    assert_eq!(
        tokio::fs::read(first["full_path"].as_str().unwrap())
            .await
            .unwrap(),
        b"Generate an image of: first"
    );
    assert_eq!(
        tokio::fs::read(second["full_path"].as_str().unwrap())
            .await
            .unwrap(),
        b"Generate an image of: second"
    );
    app.cleanup().await;
}

#[tokio::test]
async fn generate_image_base64_encodes_png() {
    let app = TestApp::spawn().await;

    let response = app.post_prompt("/generate-image-base64", "a cat").await;

    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(
        body["base64_image"]
            .as_str()
            .unwrap()
            .starts_with("iVBORw0KGgo")
    );
    app.cleanup().await;
}

#[tokio::test]
async fn concurrent_requests_keep_their_own_output() {
    let backend = MockBackend::echo().with_latency(std::time::Duration::from_millis(50));
    let max_in_flight = backend.max_in_flight();
    let app = TestApp::spawn_with(backend).await;

    let (first, second) = tokio::join!(
        app.post_prompt("/generate-image-binary", "first prompt"),
        app.post_prompt("/generate-image-binary", "second prompt"),
    );

    assert_eq!(&first.bytes().await.unwrap()[..], b"first prompt");
    assert_eq!(&second.bytes().await.unwrap()[..], b"second prompt");
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    app.cleanup().await;
}

#[tokio::test]
async fn empty_credentials_refuse_to_start() {
    let backend = MockBackend::new();
    let init_calls = backend.init_counter();

    let mut config = test_config();
    config.credentials = Credentials::new("", "test-psidts-cookie");

    let result = Application::build_with_backend(config, Box::new(backend)).await;

    assert!(result.is_err());
    assert_eq!(init_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_session_init_refuses_to_start() {
    let backend = MockBackend::new().failing_init(BackendError::Api {
        status: 401,
        message: "cookies expired".to_string(),
    });

    let result = Application::build_with_backend(test_config(), Box::new(backend)).await;

    assert!(result.is_err());
}
