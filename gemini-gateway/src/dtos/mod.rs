pub mod generation;

pub use generation::{ImageBase64Response, ImageFileResponse, Prompt, TextResponse};
