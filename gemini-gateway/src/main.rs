use gemini_gateway::config::GatewayConfig;
use gemini_gateway::services::metrics::init_metrics;
use gemini_gateway::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    let config = GatewayConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing("gemini-gateway", "info", config.otlp_endpoint.as_deref());
    init_metrics();

    tracing::info!(
        credentials = ?config.credentials,
        backend = ?config.session.backend,
        "Starting gemini gateway"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to start gemini gateway: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_until_stopped().await
}
