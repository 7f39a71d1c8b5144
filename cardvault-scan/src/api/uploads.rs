//! Multipart upload parsing shared by the scan and batch routes

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use std::collections::HashMap;

use crate::config::UploadConfig;
use crate::error::{ApiError, ApiResult};
use crate::types::ImageUpload;

/// Multipart field carrying image files
pub const IMAGES_FIELD: &str = "images";

/// Parsed multipart form: image files plus any text fields
#[derive(Debug, Default)]
pub struct UploadForm {
    pub images: Vec<ImageUpload>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    /// Text field value, trimmed; `None` when absent or blank
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Read a multipart body, enforcing the file count and per-file size limits
pub async fn read_upload_form(mut multipart: Multipart, limits: &UploadConfig) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name != IMAGES_FIELD {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, value);
            continue;
        }

        if form.images.len() >= limits.max_files {
            return Err(ApiError::BadRequest(format!(
                "At most {} images may be uploaded at once",
                limits.max_files
            )));
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("image-{}", form.images.len() + 1));
        let bytes = field.bytes().await.map_err(multipart_error)?;

        if bytes.len() > limits.max_file_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "{} is {} bytes; the limit is {} bytes",
                filename,
                bytes.len(),
                limits.max_file_bytes
            )));
        }

        form.images.push(ImageUpload::new(filename, bytes.to_vec()));
    }

    if form.images.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "No images uploaded (expected multipart field '{}')",
            IMAGES_FIELD
        )));
    }

    tracing::debug!(images = form.images.len(), "Upload form parsed");

    Ok(form)
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Request body cap for upload routes: every file at the limit plus form overhead
pub fn upload_body_limit(limits: &UploadConfig) -> usize {
    limits.max_files * limits.max_file_bytes + 1024 * 1024
}
