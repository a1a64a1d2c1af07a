//! Backend reached through a local bridge process.
//!
//! The bridge hosts the cookie-authenticated browser-automation client and
//! exposes it over a small JSON API:
//!
//! - `POST /v1/sessions` opens a session from the two cookies and returns
//!   `{"session_id": "..."}`.
//! - `POST /v1/sessions/{id}/generate` takes `{"prompt", "files"}` (paths on
//!   the shared filesystem) and returns `{"text", "images": [{"data", "url"}]}`
//!   where `data` is base64 and either field may be absent.

use super::{BackendError, Credentials, GenerationBackend, InitOptions};
use crate::models::{ArtifactHandle, GenerationResponse};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub struct BridgeBackend {
    client: Client,
    base_url: String,
    session_id: Option<String>,
}

impl BridgeBackend {
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_id: None,
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl GenerationBackend for BridgeBackend {
    fn name(&self) -> &'static str {
        "bridge"
    }

    async fn init(
        &mut self,
        credentials: &Credentials,
        options: &InitOptions,
    ) -> Result<(), BackendError> {
        let request = OpenSessionRequest {
            psid: credentials.psid(),
            psidts: credentials.psidts(),
            timeout_secs: options.timeout.as_secs(),
            auto_refresh: options.auto_refresh,
        };

        let response: OpenSessionResponse = self.post("/v1/sessions", &request).await?;
        if response.session_id.is_empty() {
            return Err(BackendError::Protocol("Empty session id".to_string()));
        }

        tracing::debug!(session_id = %response.session_id, "Bridge session opened");
        self.session_id = Some(response.session_id);
        Ok(())
    }

    async fn generate(
        &mut self,
        prompt: &str,
        files: &[PathBuf],
    ) -> Result<GenerationResponse, BackendError> {
        let session_id = self
            .session_id
            .as_deref()
            .ok_or(BackendError::NotInitialized)?;

        let request = GenerateRequest {
            prompt,
            files: files
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect(),
        };

        let response: GenerateResponse = self
            .post(&format!("/v1/sessions/{}/generate", session_id), &request)
            .await?;

        response.into_generation_response()
    }
}

// ============================================================================
// Bridge API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenSessionRequest<'a> {
    psid: &'a str,
    psidts: &'a str,
    timeout_secs: u64,
    auto_refresh: bool,
}

#[derive(Debug, Deserialize)]
struct OpenSessionResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    images: Vec<BridgeImage>,
}

#[derive(Debug, Deserialize)]
struct BridgeImage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl GenerateResponse {
    fn into_generation_response(self) -> Result<GenerationResponse, BackendError> {
        let mut response = GenerationResponse::text(self.text.unwrap_or_default());

        for image in self.images {
            let mut handle = ArtifactHandle::empty();
            if let Some(data) = image.data.filter(|d| !d.is_empty()) {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| BackendError::Protocol(format!("Invalid image data: {}", e)))?;
                handle = handle.with_inline(bytes);
            }
            if let Some(url) = image.url {
                handle = handle.with_url(url);
            }
            response = response.with_artifact(handle);
        }

        Ok(response)
    }
}
