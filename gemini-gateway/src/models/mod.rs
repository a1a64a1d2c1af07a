pub mod artifact;
pub mod generation;

pub use artifact::{ArtifactHandle, ArtifactSaver, GenerationResponse, Representation};
pub use generation::{Deliverable, GenerationRequest, PNG_MEDIA_TYPE, UploadedFile};
