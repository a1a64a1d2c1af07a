use crate::dtos::{ImageBase64Response, ImageFileResponse, Prompt, TextResponse};
use crate::models::{Deliverable, GenerationRequest, UploadedFile};
use crate::services::metrics;
use crate::services::orchestrator::{Expectation, GenerationError, image_prompt};
use crate::startup::AppState;
use axum::{
    Json,
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
};
use base64::Engine;
use service_core::error::AppError;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use validator::Validate;

const PROMPT_FIELD: &str = "prompt";
const IMAGES_FIELD: &str = "images";

impl IntoResponse for Deliverable {
    fn into_response(self) -> Response {
        match self {
            Deliverable::Text(text) => Json(TextResponse { text }).into_response(),
            Deliverable::Image { bytes, media_type } => {
                ([(header::CONTENT_TYPE, media_type)], bytes).into_response()
            }
        }
    }
}

pub async fn generate_text(
    State(state): State<AppState>,
    Json(payload): Json<Prompt>,
) -> Result<Json<TextResponse>, AppError> {
    payload.validate()?;
    let request = build_request(payload.prompt, Vec::new())?;

    match run(&state, "generate-text", request, Expectation::Text).await? {
        Deliverable::Text(text) => Ok(Json(TextResponse { text })),
        Deliverable::Image { .. } => Err(AppError::InternalError(anyhow::anyhow!(
            "Expected text, received an image"
        ))),
    }
}

pub async fn generate_image_binary(
    State(state): State<AppState>,
    Json(payload): Json<Prompt>,
) -> Result<Response, AppError> {
    payload.validate()?;
    let request = build_request(payload.prompt, Vec::new())?;

    let deliverable = run(&state, "generate-image-binary", request, Expectation::Image).await?;
    Ok(deliverable.into_response())
}

/// Multipart form with one `prompt` text field and any number of `images`
/// file parts. Responds with the PNG, or `{text}` when the backend only
/// answered in prose.
pub async fn generate_with_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut prompt = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        GenerationError::InvalidRequest(format!("Failed to read multipart field: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            PROMPT_FIELD => {
                let text = field.text().await.map_err(|e| {
                    GenerationError::InvalidRequest(format!("Failed to read prompt: {}", e))
                })?;
                prompt = Some(text);
            }
            IMAGES_FIELD => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| {
                    GenerationError::InvalidRequest(format!(
                        "Failed to read image {}: {}",
                        file_name, e
                    ))
                })?;
                // Browsers submit an empty part when no file was picked.
                if file_name.is_empty() && data.is_empty() {
                    continue;
                }
                files.push(UploadedFile::new(file_name, data.to_vec()));
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let prompt = prompt
        .ok_or_else(|| GenerationError::InvalidRequest("Missing prompt field".to_string()))?;
    let request = build_request(prompt, files)?;

    tracing::info!(
        file_count = request.files().len(),
        "Generating with uploaded images"
    );

    let deliverable = run(
        &state,
        "generate-with-images",
        request,
        Expectation::ImageOrText,
    )
    .await?;
    Ok(deliverable.into_response())
}

/// Generates an image and writes it to the images directory as
/// `image_<unix_ts>_<uuid>.png`; an existing file is never overwritten.
pub async fn generate_image(
    State(state): State<AppState>,
    Json(payload): Json<Prompt>,
) -> Result<Json<ImageFileResponse>, AppError> {
    payload.validate()?;
    let request = build_image_request(&payload.prompt)?;

    let bytes = expect_image(run(&state, "generate-image", request, Expectation::Image).await?)?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let filename = format!("image_{}_{}.png", timestamp, Uuid::new_v4().simple());
    let path = state.config.storage.images_dir.join(&filename);

    save_new_file(&path, &bytes).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to save generated image");
        AppError::from(e)
    })?;
    let full_path = std::path::absolute(&path)?;

    tracing::info!(path = %full_path.display(), size = bytes.len(), "Saved generated image");

    Ok(Json(ImageFileResponse {
        filename,
        full_path: full_path.to_string_lossy().into_owned(),
    }))
}

pub async fn generate_image_base64(
    State(state): State<AppState>,
    Json(payload): Json<Prompt>,
) -> Result<Json<ImageBase64Response>, AppError> {
    payload.validate()?;
    let request = build_image_request(&payload.prompt)?;

    let bytes = expect_image(
        run(
            &state,
            "generate-image-base64",
            request,
            Expectation::Image,
        )
        .await?,
    )?;

    Ok(Json(ImageBase64Response {
        base64_image: base64::engine::general_purpose::STANDARD.encode(bytes),
    }))
}

async fn save_new_file(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

fn build_request(
    prompt: String,
    files: Vec<UploadedFile>,
) -> Result<GenerationRequest, GenerationError> {
    GenerationRequest::new(prompt, files)
        .ok_or_else(|| GenerationError::InvalidRequest("Prompt must not be blank".to_string()))
}

fn build_image_request(prompt: &str) -> Result<GenerationRequest, GenerationError> {
    if prompt.trim().is_empty() {
        return Err(GenerationError::InvalidRequest(
            "Prompt must not be blank".to_string(),
        ));
    }
    build_request(image_prompt(prompt), Vec::new())
}

fn expect_image(deliverable: Deliverable) -> Result<Vec<u8>, AppError> {
    match deliverable {
        Deliverable::Image { bytes, .. } => Ok(bytes),
        Deliverable::Text(_) => Err(AppError::InternalError(anyhow::anyhow!(
            "Expected an image, received text"
        ))),
    }
}

/// Runs the orchestrator and records the per-route metrics.
async fn run(
    state: &AppState,
    route: &'static str,
    request: GenerationRequest,
    expectation: Expectation,
) -> Result<Deliverable, GenerationError> {
    let started = Instant::now();
    let result = state.orchestrator.generate(request, expectation).await;

    let outcome = match &result {
        Ok(_) => "success",
        Err(GenerationError::InvalidRequest(_)) => "invalid_request",
        Err(GenerationError::NoArtifactProduced { .. }) => "no_artifact",
        Err(GenerationError::Staging(_)) => "staging_error",
        Err(GenerationError::Upstream { .. }) => "upstream_error",
        Err(GenerationError::Normalization(_)) => "normalization_failure",
    };
    metrics::record_request(route, outcome, started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        tracing::warn!(route, error = %e, "Generation request failed");
    }

    result
}
