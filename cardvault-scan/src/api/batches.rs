//! Batch endpoints
//!
//! Uploads are resolved and appended to the caller's batch for the
//! client-supplied `batch_group_id`.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use cardvault_common::Batch;
use serde::Serialize;
use serde_json::json;

use crate::api::uploads::{read_upload_form, upload_body_limit};
use crate::auth::MaybeUser;
use crate::error::{ApiError, ApiResult};
use crate::types::{verified_entries, ImageOutcome};
use crate::AppState;

/// Multipart text field naming the batch group
pub const GROUP_FIELD: &str = "batch_group_id";

#[derive(Debug, Serialize)]
pub struct BatchUploadResponse {
    pub batch: Batch,
    pub results: Vec<ImageOutcome>,
}

/// POST /api/batches
///
/// 201 when the upload created the group's batch, 200 when it appended.
pub async fn upload_batch(
    State(state): State<AppState>,
    user: MaybeUser,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<BatchUploadResponse>)> {
    let form = read_upload_form(multipart, &state.uploads).await?;
    let group_id = form
        .field(GROUP_FIELD)
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", GROUP_FIELD)))?
        .to_string();

    tracing::info!(
        batch_group_id = %group_id,
        images = form.images.len(),
        "Batch upload"
    );

    // Someone else's group: fail before paying for text detection
    state.batches.check_appendable(&group_id, user.user()).await?;

    let results = state.pipeline.process_all(form.images).await;
    let cards = verified_entries(&results);

    let (batch, created) = state
        .batches
        .append_batch(&group_id, user.user(), cards)
        .await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(BatchUploadResponse { batch, results })))
}

/// GET /api/batches/group/:group_id
pub async fn list_group(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(group_id): Path<String>,
) -> ApiResult<Json<Vec<Batch>>> {
    let batches = state.batches.list_by_group(&group_id, user.user()).await?;
    Ok(Json(batches))
}

/// DELETE /api/batches/group/:group_id
pub async fn delete_group(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(group_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.batches.delete_group(&group_id, user.user()).await?;
    Ok(Json(json!({
        "message": "All batches in group deleted",
        "deleted": deleted,
    })))
}

/// DELETE /api/batches/group/:group_id/cards/:index
pub async fn remove_card(
    State(state): State<AppState>,
    user: MaybeUser,
    Path((group_id, index)): Path<(String, usize)>,
) -> ApiResult<Json<Batch>> {
    let batch = state
        .batches
        .remove_card_at(&group_id, user.user(), index)
        .await?;
    Ok(Json(batch))
}

pub fn batch_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/batches",
            post(upload_batch).layer(DefaultBodyLimit::max(upload_body_limit(&state.uploads))),
        )
        .route("/api/batches/group/:group_id", get(list_group).delete(delete_group))
        .route("/api/batches/group/:group_id/cards/:index", delete(remove_card))
}
