pub mod metrics;
pub mod normalizer;
pub mod orchestrator;
pub mod session;
pub mod staging;

pub use normalizer::{ArtifactFetcher, ArtifactNormalizer, HttpArtifactFetcher};
pub use orchestrator::{Expectation, GenerationError, GenerationOrchestrator};
pub use session::{GenerationBackend, SessionHandle};
pub use staging::StagingArea;
