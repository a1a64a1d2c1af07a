//! Drives one generation request end to end.
//!
//! Per request: stage uploads, then up to `max_attempts` rounds of
//! submit + normalize, then release the staged files on every exit path.
//! Upstream errors and empty (artifact-less) responses are retried until the
//! budget runs out. A normalization failure is retried once; a second one
//! ends the request.
//!
//! When the budget runs out, a request that saw any artifact-less response
//! ends as "no artifact" (or its text fallback) even if the final attempt
//! failed upstream.

use crate::models::{Deliverable, GenerationRequest};
use crate::services::metrics;
use crate::services::normalizer::{ArtifactNormalizer, NormalizationFailure};
use crate::services::session::{BackendError, SessionHandle};
use crate::services::staging::{StagingArea, StagingError};
use service_core::error::AppError;
use service_core::retry::RetryConfig;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Prefix the image routes add to the caller's prompt.
pub const IMAGE_PROMPT_PREFIX: &str = "Generate an image of: ";

pub fn image_prompt(prompt: &str) -> String {
    format!("{}{}", IMAGE_PROMPT_PREFIX, prompt)
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("Generation failed after {attempts} attempt(s): {source}")]
    Upstream {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error(
        "No image generated after {attempts} attempt(s). Use a clear prompt such as 'a cat in space'."
    )]
    NoArtifactProduced { attempts: u32 },

    #[error(transparent)]
    Normalization(#[from] NormalizationFailure),
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        // Messages already embed their causes.
        let message = anyhow::anyhow!(err.to_string());
        match err {
            GenerationError::InvalidRequest(_) | GenerationError::NoArtifactProduced { .. } => {
                AppError::BadRequest(message)
            }
            GenerationError::Staging(_)
            | GenerationError::Upstream { .. }
            | GenerationError::Normalization(_) => AppError::InternalError(message),
        }
    }
}

/// What the caller needs from the backend response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// The response text; artifacts are ignored.
    Text,
    /// An image; text-only responses are retried.
    Image,
    /// An image, falling back to the text once the budget is spent.
    ImageOrText,
}

/// Why a single attempt did not yield a deliverable.
enum AttemptFailure {
    Upstream(BackendError),
    NoArtifact { text: String },
    Normalization(NormalizationFailure),
}

impl AttemptFailure {
    fn label(&self) -> &'static str {
        match self {
            AttemptFailure::Upstream(_) => "upstream_error",
            AttemptFailure::NoArtifact { .. } => "no_artifact",
            AttemptFailure::Normalization(_) => "normalization_failure",
        }
    }

}

/// What earlier failed attempts of one request produced.
#[derive(Debug, Default)]
struct AttemptHistory {
    no_artifact_seen: bool,
    fallback_text: Option<String>,
}

impl AttemptHistory {
    fn record(&mut self, failure: &AttemptFailure) {
        if let AttemptFailure::NoArtifact { text } = failure {
            self.no_artifact_seen = true;
            if !text.trim().is_empty() {
                self.fallback_text = Some(text.clone());
            }
        }
    }

    /// Terminal outcome once no further attempt will be made. `last` must
    /// already be recorded.
    fn conclude(
        self,
        last: AttemptFailure,
        attempts: u32,
        expectation: Expectation,
    ) -> Result<Deliverable, GenerationError> {
        match last {
            AttemptFailure::Normalization(failure) => Err(GenerationError::Normalization(failure)),
            AttemptFailure::Upstream(source) if !self.no_artifact_seen => {
                Err(GenerationError::Upstream { attempts, source })
            }
            _ => match self.fallback_text {
                Some(text) if expectation == Expectation::ImageOrText => {
                    Ok(Deliverable::Text(text))
                }
                _ => Err(GenerationError::NoArtifactProduced { attempts }),
            },
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Upstream(e) => write!(f, "{}", e),
            AttemptFailure::NoArtifact { .. } => write!(f, "response carried no artifact"),
            AttemptFailure::Normalization(e) => write!(f, "{}", e),
        }
    }
}

pub struct GenerationOrchestrator {
    session: Arc<SessionHandle>,
    normalizer: ArtifactNormalizer,
    staging: StagingArea,
    retry: RetryConfig,
}

impl GenerationOrchestrator {
    pub fn new(
        session: Arc<SessionHandle>,
        normalizer: ArtifactNormalizer,
        staging: StagingArea,
        retry: RetryConfig,
    ) -> Self {
        Self {
            session,
            normalizer,
            staging,
            retry,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
        expectation: Expectation,
    ) -> Result<Deliverable, GenerationError> {
        let staged = self.staging.stage_all(request.files()).await?;

        let result = self
            .run_attempts(request.prompt(), &staged.paths(), expectation)
            .await;

        staged.release().await;
        result
    }

    async fn run_attempts(
        &self,
        prompt: &str,
        files: &[PathBuf],
        expectation: Expectation,
    ) -> Result<Deliverable, GenerationError> {
        let max_attempts = self.retry.max_attempts;
        let mut normalization_retried = false;
        let mut history = AttemptHistory::default();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match self.attempt(prompt, files, expectation).await {
                Ok(deliverable) => {
                    metrics::record_attempt("success");
                    tracing::info!(attempt, max_attempts, "Generation attempt succeeded");
                    return Ok(deliverable);
                }
                Err(failure) => failure,
            };
            metrics::record_attempt(failure.label());
            history.record(&failure);

            let retryable = match failure {
                AttemptFailure::Normalization(_) => {
                    !std::mem::replace(&mut normalization_retried, true)
                }
                _ => true,
            };

            if !retryable || !self.retry.allows_another(attempt) {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    reason = %failure,
                    "Generation attempt failed, giving up"
                );
                return history.conclude(failure, attempt, expectation);
            }

            let backoff = self.retry.backoff_duration(attempt);
            tracing::warn!(
                attempt,
                max_attempts,
                reason = %failure,
                backoff_ms = backoff.as_millis() as u64,
                "Generation attempt failed, retrying"
            );
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        files: &[PathBuf],
        expectation: Expectation,
    ) -> Result<Deliverable, AttemptFailure> {
        let response = self
            .session
            .submit(prompt, files)
            .await
            .map_err(AttemptFailure::Upstream)?;

        if expectation == Expectation::Text {
            return Ok(Deliverable::Text(response.text));
        }

        let (text, artifact) = response.into_first_artifact();
        let Some(artifact) = artifact else {
            return Err(AttemptFailure::NoArtifact { text });
        };

        self.normalizer
            .normalize(artifact)
            .await
            .map_err(AttemptFailure::Normalization)
    }
}
