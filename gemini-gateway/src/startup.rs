//! Application startup and lifecycle management.
//!
//! The backend session is initialized before the listener is bound: a
//! process without a working session never accepts traffic.

use crate::config::{BackendKind, GatewayConfig};
use crate::handlers;
use crate::services::metrics;
use crate::services::normalizer::{ArtifactNormalizer, HttpArtifactFetcher};
use crate::services::session::{
    BridgeBackend, GenerationBackend, InitOptions, MockBackend, SessionHandle,
};
use crate::services::{GenerationOrchestrator, StagingArea};
use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use service_core::error::AppError;
use service_core::middleware::{make_request_span, request_id_middleware};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub orchestrator: Arc<GenerationOrchestrator>,
}

pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.storage.max_upload_bytes;

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .route("/generate-text", post(handlers::generate_text))
        .route("/generate-image", post(handlers::generate_image))
        .route("/generate-image-base64", post(handlers::generate_image_base64))
        .route("/generate-image-binary", post(handlers::generate_image_binary))
        .route("/generate-with-images", post(handlers::generate_with_images))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
}

impl Application {
    /// Build with the backend selected by `GATEWAY_BACKEND`.
    pub async fn build(config: GatewayConfig) -> Result<Self, AppError> {
        let backend: Box<dyn GenerationBackend> = match config.session.backend {
            BackendKind::Bridge => Box::new(
                BridgeBackend::new(&config.session.bridge_url)
                    .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?,
            ),
            BackendKind::Mock => {
                tracing::warn!("Using mock backend; responses are synthetic");
                Box::new(MockBackend::new())
            }
        };

        Self::build_with_backend(config, backend).await
    }

    pub async fn build_with_backend(
        config: GatewayConfig,
        backend: Box<dyn GenerationBackend>,
    ) -> Result<Self, AppError> {
        let session = SessionHandle::initialize(
            backend,
            config.credentials.clone(),
            InitOptions {
                timeout: config.session.init_timeout,
                auto_refresh: config.session.auto_refresh,
            },
            config.session.submit_timeout,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize backend session");
            AppError::ConfigError(anyhow::anyhow!(e))
        })?;

        let staging = StagingArea::new(&config.storage.staging_dir)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to prepare staging directory");
                AppError::InternalError(anyhow::anyhow!(e))
            })?;
        let staging = match metrics::staged_files_gauge() {
            Some(gauge) => staging.with_gauge(gauge),
            None => staging,
        };

        tokio::fs::create_dir_all(&config.storage.images_dir)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create images directory {}: {}",
                    config.storage.images_dir.display(),
                    e
                );
                AppError::from(e)
            })?;

        let fetcher = HttpArtifactFetcher::new(&config.fetch)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        let orchestrator = GenerationOrchestrator::new(
            Arc::new(session),
            ArtifactNormalizer::new(Arc::new(fetcher)),
            staging,
            config.retry.clone(),
        );

        let state = AppState {
            config: config.clone(),
            orchestrator: Arc::new(orchestrator),
        };

        let backend_name = state.orchestrator.session().backend_name();
        let app = build_router(state);

        let ip = config
            .common
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!(
                    "Invalid host {}: {}",
                    config.common.host,
                    e
                ))
            })?;
        let addr = SocketAddr::new(ip, config.common.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            backend = backend_name,
            max_attempts = config.retry.max_attempts,
            "Gemini gateway listening"
        );

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
