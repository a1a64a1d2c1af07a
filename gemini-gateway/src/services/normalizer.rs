//! Turns whatever artifact shape the backend returned into a [`Deliverable`].

use crate::config::FetchConfig;
use crate::models::{ArtifactHandle, Deliverable, Representation};
use async_trait::async_trait;
use reqwest::{Client, redirect};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizationFailure {
    #[error("Failed to fetch generated image: {0}")]
    UpstreamFetchFailed(String),

    #[error("Failed to read generated image: {0}")]
    StreamSaveFailed(String),

    #[error("Generated artifact has no usable representation")]
    NoUsableRepresentation,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("empty response body")]
    EmptyBody,
}

/// Downloads an artifact published at a URL.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// [`ArtifactFetcher`] over HTTP with a browser user agent.
pub struct HttpArtifactFetcher {
    client: Client,
}

impl HttpArtifactFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(redirect::Policy::limited(config.max_redirects))
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok(bytes.to_vec())
    }
}

#[derive(Clone)]
pub struct ArtifactNormalizer {
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl ArtifactNormalizer {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self { fetcher }
    }

    /// Exactly one representation is used: inline bytes, else the URL, else
    /// the stream saver. Every image is delivered as PNG.
    pub async fn normalize(
        &self,
        artifact: ArtifactHandle,
    ) -> Result<Deliverable, NormalizationFailure> {
        match artifact.into_representation() {
            Representation::Inline(bytes) => Ok(Deliverable::png(bytes)),
            Representation::Remote(url) => {
                tracing::debug!(url = %url, "Fetching generated image");
                let bytes = self.fetcher.fetch(&url).await.map_err(|e| {
                    NormalizationFailure::UpstreamFetchFailed(format!("{}: {}", url, e))
                })?;
                Ok(Deliverable::png(bytes))
            }
            Representation::Stream(saver) => {
                let mut buffer = Vec::new();
                saver
                    .save_to(&mut buffer)
                    .await
                    .map_err(|e| NormalizationFailure::StreamSaveFailed(e.to_string()))?;
                if buffer.is_empty() {
                    return Err(NormalizationFailure::StreamSaveFailed(
                        "stream produced no bytes".to_string(),
                    ));
                }
                Ok(Deliverable::png(buffer))
            }
            Representation::Unusable => Err(NormalizationFailure::NoUsableRepresentation),
        }
    }
}
