//! One-shot scan endpoint
//!
//! Resolves uploaded images without storing anything.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use cardvault_common::CardEntry;
use serde::Serialize;

use crate::api::uploads::{read_upload_form, upload_body_limit};
use crate::auth::MaybeUser;
use crate::error::ApiResult;
use crate::types::{verified_entries, ImageOutcome};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    /// One outcome per uploaded image, in upload order
    pub results: Vec<ImageOutcome>,
    /// Cards from the verified outcomes
    pub processed_cards: Vec<CardEntry>,
}

/// POST /api/scan
pub async fn scan_images(
    State(state): State<AppState>,
    user: MaybeUser,
    multipart: Multipart,
) -> ApiResult<Json<ScanResponse>> {
    let form = read_upload_form(multipart, &state.uploads).await?;

    tracing::info!(
        images = form.images.len(),
        user_id = ?user.user().map(|u| u.as_str()),
        "Scan request"
    );

    let results = state.pipeline.process_all(form.images).await;
    let processed_cards = verified_entries(&results);

    Ok(Json(ScanResponse {
        results,
        processed_cards,
    }))
}

pub fn scan_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/api/scan", post(scan_images))
        .layer(DefaultBodyLimit::max(upload_body_limit(&state.uploads)))
}
