/// Media type of every image the gateway delivers.
pub const PNG_MEDIA_TYPE: &str = "image/png";

/// An input file uploaded alongside a prompt.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// A prompt plus zero or more input files, validated on construction.
#[derive(Debug)]
pub struct GenerationRequest {
    prompt: String,
    files: Vec<UploadedFile>,
}

impl GenerationRequest {
    /// Returns `None` when the prompt is blank.
    pub fn new(prompt: impl Into<String>, files: Vec<UploadedFile>) -> Option<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return None;
        }
        Some(Self { prompt, files })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }
}

/// Normalized output handed back to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deliverable {
    Text(String),
    Image {
        bytes: Vec<u8>,
        media_type: &'static str,
    },
}

impl Deliverable {
    pub fn png(bytes: Vec<u8>) -> Self {
        Deliverable::Image {
            bytes,
            media_type: PNG_MEDIA_TYPE,
        }
    }
}
