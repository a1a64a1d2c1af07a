mod common;

use common::TestApp;
use gemini_gateway::services::metrics::init_metrics;

#[tokio::test]
async fn health_check_returns_ok() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "gemini-gateway");
    assert_eq!(body["backend"], "mock");
    app.cleanup().await;
}

#[tokio::test]
async fn ready_returns_ok() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/ready", app.address))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status().as_u16(), 200);
    app.cleanup().await;
}

#[tokio::test]
async fn request_id_is_propagated() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .header("x-request-id", "req-123")
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.headers()["x-request-id"], "req-123");
    app.cleanup().await;
}

#[tokio::test]
async fn metrics_are_exposed() {
    init_metrics();
    let app = TestApp::spawn().await;

    app.post_prompt("/generate-text", "hello").await;

    let response = app
        .client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body = response.text().await.expect("Failed to read body");
    assert!(body.contains("gateway_requests_total"));
    assert!(body.contains("route=\"generate-text\""));
    app.cleanup().await;
}
