use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct Prompt {
    #[validate(length(min = 1, message = "Prompt is required"))]
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

/// Location of an image written by `/generate-image`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageFileResponse {
    pub filename: String,
    pub full_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageBase64Response {
    pub base64_image: String,
}
