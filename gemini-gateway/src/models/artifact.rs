//! Generated artifacts as received from the backend session.
//!
//! The backend's artifact shape is not stable across client versions. An
//! [`ArtifactHandle`] records every representation the backend exposed for one
//! output item; [`ArtifactHandle::into_representation`] picks exactly one of
//! them in a fixed preference order.

use async_trait::async_trait;
use std::fmt;
use tokio::io::AsyncWrite;

/// An artifact that can write its own encoded bytes to a sink.
#[async_trait]
pub trait ArtifactSaver: Send + Sync {
    async fn save_to(&self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> std::io::Result<()>;
}

/// One generated output item, with every representation the backend exposed.
#[derive(Default)]
pub struct ArtifactHandle {
    inline: Option<Vec<u8>>,
    url: Option<String>,
    saver: Option<Box<dyn ArtifactSaver>>,
}

/// The single representation selected from an [`ArtifactHandle`].
pub enum Representation {
    Inline(Vec<u8>),
    Remote(String),
    Stream(Box<dyn ArtifactSaver>),
    Unusable,
}

impl ArtifactHandle {
    pub fn inline(bytes: impl Into<Vec<u8>>) -> Self {
        Self::default().with_inline(bytes)
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self::default().with_url(url)
    }

    pub fn stream(saver: impl ArtifactSaver + 'static) -> Self {
        Self::default().with_saver(saver)
    }

    /// A handle exposing nothing usable.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_inline(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.inline = Some(bytes.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_saver(mut self, saver: impl ArtifactSaver + 'static) -> Self {
        self.saver = Some(Box::new(saver));
        self
    }

    /// Inline bytes (if non-empty), then URL, then stream save.
    pub fn into_representation(self) -> Representation {
        match self {
            Self {
                inline: Some(bytes),
                ..
            } if !bytes.is_empty() => Representation::Inline(bytes),
            Self { url: Some(url), .. } if !url.trim().is_empty() => Representation::Remote(url),
            Self {
                saver: Some(saver), ..
            } => Representation::Stream(saver),
            _ => Representation::Unusable,
        }
    }
}

impl fmt::Debug for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactHandle")
            .field("inline_len", &self.inline.as_ref().map(Vec::len))
            .field("url", &self.url)
            .field("saver", &self.saver.is_some())
            .finish()
    }
}

/// Raw result of one backend submission.
#[derive(Debug, Default)]
pub struct GenerationResponse {
    pub text: String,
    pub artifacts: Vec<ArtifactHandle>,
}

impl GenerationResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactHandle) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Split into the text and the first artifact; the rest are dropped.
    pub fn into_first_artifact(self) -> (String, Option<ArtifactHandle>) {
        let first = self.artifacts.into_iter().next();
        (self.text, first)
    }
}
