//! In-process backend for local development and tests.

use super::{BackendError, Credentials, GenerationBackend, InitOptions};
use crate::models::{ArtifactHandle, GenerationResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A valid 1x1 transparent PNG.
pub const MOCK_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// One recorded `generate` call.
#[derive(Debug, Clone)]
pub struct SubmittedCall {
    pub prompt: String,
    pub files: Vec<PathBuf>,
    /// Whether every file existed on disk when the call was made.
    pub files_present: bool,
}

enum Mode {
    Fixed,
    Echo,
    Scripted(VecDeque<Result<GenerationResponse, BackendError>>),
}

/// Mock backend with shared, inspectable call counters.
pub struct MockBackend {
    mode: Mode,
    latency: Option<Duration>,
    init_latency: Option<Duration>,
    init_error: Option<BackendError>,
    initialized: bool,
    init_calls: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<SubmittedCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Answers every prompt with a short text and [`MOCK_PNG`].
    pub fn new() -> Self {
        Self::with_mode(Mode::Fixed)
    }

    /// Answers with the prompt bytes as the inline artifact.
    pub fn echo() -> Self {
        Self::with_mode(Mode::Echo)
    }

    /// Replays `responses` in order, then answers text-only.
    pub fn scripted(responses: Vec<Result<GenerationResponse, BackendError>>) -> Self {
        Self::with_mode(Mode::Scripted(responses.into()))
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            latency: None,
            init_latency: None,
            init_error: None,
            initialized: false,
            init_calls: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_init_latency(mut self, latency: Duration) -> Self {
        self.init_latency = Some(latency);
        self
    }

    pub fn failing_init(mut self, error: BackendError) -> Self {
        self.init_error = Some(error);
        self
    }

    pub fn init_counter(&self) -> Arc<AtomicUsize> {
        self.init_calls.clone()
    }

    pub fn call_log(&self) -> Arc<Mutex<Vec<SubmittedCall>>> {
        self.calls.clone()
    }

    /// Highest number of `generate` calls observed running at once.
    pub fn max_in_flight(&self) -> Arc<AtomicUsize> {
        self.max_in_flight.clone()
    }

    fn next_response(&mut self, prompt: &str) -> Result<GenerationResponse, BackendError> {
        match &mut self.mode {
            Mode::Fixed => Ok(GenerationResponse::text(format!("Mock response for: {}", prompt))
                .with_artifact(ArtifactHandle::inline(MOCK_PNG))),
            Mode::Echo => Ok(GenerationResponse::text(prompt)
                .with_artifact(ArtifactHandle::inline(prompt.as_bytes()))),
            Mode::Scripted(responses) => responses
                .pop_front()
                .unwrap_or_else(|| Ok(GenerationResponse::text("No image produced"))),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn init(
        &mut self,
        _credentials: &Credentials,
        _options: &InitOptions,
    ) -> Result<(), BackendError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.init_latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = self.init_error.take() {
            return Err(error);
        }

        self.initialized = true;
        Ok(())
    }

    async fn generate(
        &mut self,
        prompt: &str,
        files: &[PathBuf],
    ) -> Result<GenerationResponse, BackendError> {
        if !self.initialized {
            return Err(BackendError::NotInitialized);
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(SubmittedCall {
                prompt: prompt.to_string(),
                files: files.to_vec(),
                files_present: files.iter().all(|path| path.exists()),
            });
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let response = self.next_response(prompt);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}
