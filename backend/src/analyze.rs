use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use log::{info, warn};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::errors::ApiError;
use crate::extraction::{ExtractionError, ImageUpload, ListingFields};

pub const NO_IMAGE_MESSAGE: &str = "No image provided";
pub const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/gif"];

/// Identifies the image format from its leading bytes.
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        Some("image/webp")
    } else {
        None
    }
}

/// Applies the upload constraints: non-empty, within `max_bytes`, and one of
/// the allowed formats judged by content rather than the declared type.
pub fn validate_image(bytes: Vec<u8>, declared_type: Option<&str>, max_bytes: usize) -> Result<ImageUpload, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::Validation("The submitted image is empty.".to_string()));
    }
    if bytes.len() > max_bytes {
        return Err(too_large(max_bytes));
    }
    let Some(mime_type) = sniff_image_type(&bytes) else {
        return Err(ApiError::Validation(format!(
            "Unsupported image type{}. Allowed types: {}.",
            declared_type.map(|t| format!(" '{}'", t)).unwrap_or_default(),
            ALLOWED_IMAGE_TYPES.join(", ")
        )));
    };
    Ok(ImageUpload {
        bytes,
        mime_type: mime_type.to_string(),
    })
}

fn too_large(max_bytes: usize) -> ApiError {
    ApiError::Validation(format!("Image exceeds the maximum size of {} bytes.", max_bytes))
}

fn multipart_error(err: MultipartError, max_bytes: usize) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(max_bytes)
    } else {
        ApiError::Validation(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Suggests listing fields for the uploaded `image` form field.
pub async fn analyze_image(
    State(state): State<AppState>,
    current: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ListingFields>, ApiError> {
    let max_bytes = state.config.max_image_bytes;
    let Ok(mut multipart) = multipart else {
        return Err(ApiError::Validation(NO_IMAGE_MESSAGE.to_string()));
    };

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, max_bytes))? {
        if field.name() != Some("image") {
            continue;
        }
        let declared_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| multipart_error(e, max_bytes))?;
        upload = Some(validate_image(bytes.to_vec(), declared_type.as_deref(), max_bytes)?);
        break;
    }
    let Some(upload) = upload else {
        return Err(ApiError::Validation(NO_IMAGE_MESSAGE.to_string()));
    };

    let Some(analyzer) = state.analyzer.as_ref() else {
        return Err(ApiError::Configuration("GEMINI_API_KEY is not set".to_string()));
    };

    info!("User {} requested analysis of a {} byte {} image", current.id, upload.bytes.len(), upload.mime_type);
    match analyzer.extract_listing_from_image(upload).await {
        Ok(fields) => Ok(Json(fields)),
        Err(ExtractionError::Configuration(message)) => Err(ApiError::Configuration(message)),
        Err(e) => {
            warn!("Returning uniform analysis failure to user {} [{}]", current.id, e.code());
            Err(ApiError::AnalysisFailed)
        }
    }
}
