//! The long-lived authenticated session to the generation backend.
//!
//! A [`GenerationBackend`] is the opaque client for the upstream service.
//! [`SessionHandle`] owns exactly one initialized backend and serializes every
//! submission through a mutex, since the upstream session is not safe for
//! interleaved use.

pub mod bridge;
pub mod mock;

use crate::models::GenerationResponse;
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub use bridge::BridgeBackend;
pub use mock::MockBackend;

/// Error type for a single backend call. Every variant is retryable.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Backend error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected backend response: {0}")]
    Protocol(String),

    #[error("Backend session not initialized")]
    NotInitialized,
}

/// Fatal errors raised while establishing the session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Missing credential {0}")]
    MissingCredentials(&'static str),

    #[error("Session initialization timed out after {0:?}")]
    InitTimeout(Duration),

    #[error("Session initialization failed: {0}")]
    InitFailed(#[source] BackendError),
}

/// The two session cookies authenticating against the upstream service.
#[derive(Clone)]
pub struct Credentials {
    psid: Secret<String>,
    psidts: Secret<String>,
}

impl Credentials {
    pub fn new(psid: impl Into<String>, psidts: impl Into<String>) -> Self {
        Self {
            psid: Secret::new(psid.into()),
            psidts: Secret::new(psidts.into()),
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.psid.expose_secret().trim().is_empty() {
            return Err(SessionError::MissingCredentials("GEMINI_PSID"));
        }
        if self.psidts.expose_secret().trim().is_empty() {
            return Err(SessionError::MissingCredentials("GEMINI_PSIDTS"));
        }
        Ok(())
    }

    pub fn psid(&self) -> &str {
        self.psid.expose_secret()
    }

    pub fn psidts(&self) -> &str {
        self.psidts.expose_secret()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("psid", &redact(self.psid()))
            .field("psidts", &redact(self.psidts()))
            .finish()
    }
}

fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(10).collect();
    format!("{}...", prefix)
}

/// Options passed to the backend on initialization.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub timeout: Duration,
    /// Let the backend refresh its cookies on its own.
    pub auto_refresh: bool,
}

/// Client for the upstream generation service.
///
/// Methods take `&mut self`: a backend serves one caller at a time.
#[async_trait]
pub trait GenerationBackend: Send {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    async fn init(
        &mut self,
        credentials: &Credentials,
        options: &InitOptions,
    ) -> Result<(), BackendError>;

    async fn generate(
        &mut self,
        prompt: &str,
        files: &[PathBuf],
    ) -> Result<GenerationResponse, BackendError>;
}

/// Process-wide handle to one initialized backend session.
pub struct SessionHandle {
    backend: Mutex<Box<dyn GenerationBackend>>,
    backend_name: &'static str,
    submit_timeout: Duration,
}

impl SessionHandle {
    /// Initialize `backend` or fail; a handle is never partially initialized.
    pub async fn initialize(
        mut backend: Box<dyn GenerationBackend>,
        credentials: Credentials,
        options: InitOptions,
        submit_timeout: Duration,
    ) -> Result<Self, SessionError> {
        credentials.validate()?;

        let backend_name = backend.name();
        tracing::info!(
            backend = backend_name,
            credentials = ?credentials,
            timeout_secs = options.timeout.as_secs(),
            auto_refresh = options.auto_refresh,
            "Initializing backend session"
        );

        match tokio::time::timeout(options.timeout, backend.init(&credentials, &options)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SessionError::InitFailed(e)),
            Err(_) => return Err(SessionError::InitTimeout(options.timeout)),
        }

        tracing::info!(backend = backend_name, "Backend session initialized");

        Ok(Self {
            backend: Mutex::new(backend),
            backend_name,
            submit_timeout,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Submit one generation request. Callers queue on the session lock; the
    /// timeout covers only the backend call itself.
    pub async fn submit(
        &self,
        prompt: &str,
        files: &[PathBuf],
    ) -> Result<GenerationResponse, BackendError> {
        let mut backend = self.backend.lock().await;

        tracing::debug!(
            backend = self.backend_name,
            prompt_len = prompt.len(),
            file_count = files.len(),
            "Submitting generation request"
        );

        match tokio::time::timeout(self.submit_timeout, backend.generate(prompt, files)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.submit_timeout)),
        }
    }
}
