//! Collection endpoints

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use cardvault_common::{Collection, CollectionCard};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{MaybeUser, RequireUser};
use crate::error::ApiResult;
use crate::services::collection_store::{export_filename, render_csv};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Copy the caller's live batch for this group
    #[serde(default)]
    pub batch_group_id: Option<String>,
    /// Delete the batch group once copied
    #[serde(default)]
    pub consume_batch: bool,
    /// Initial cards when not created from a batch
    #[serde(default)]
    pub cards: Vec<CollectionCard>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCollectionRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppendCardsRequest {
    pub cards: Vec<CollectionCard>,
}

/// POST /api/collections
pub async fn create_collection(
    State(state): State<AppState>,
    user: MaybeUser,
    Json(request): Json<CreateCollectionRequest>,
) -> ApiResult<(StatusCode, Json<Collection>)> {
    let group_id = request
        .batch_group_id
        .as_deref()
        .map(str::trim)
        .filter(|g| !g.is_empty());

    let collection = match group_id {
        Some(group_id) => {
            state
                .collections
                .create_from_batch(
                    user.user(),
                    &request.title,
                    &request.description,
                    group_id,
                    request.consume_batch,
                )
                .await?
        }
        None => {
            state
                .collections
                .create(user.user(), &request.title, &request.description, request.cards)
                .await?
        }
    };

    Ok((StatusCode::CREATED, Json(collection)))
}

/// GET /api/collections
pub async fn list_collections(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
) -> ApiResult<Json<Vec<Collection>>> {
    Ok(Json(state.collections.list(&user).await?))
}

/// GET /api/collections/:id
pub async fn get_collection(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Collection>> {
    Ok(Json(state.collections.get(id, user.user()).await?))
}

/// PUT /api/collections/:id
pub async fn update_collection(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCollectionRequest>,
) -> ApiResult<Json<Collection>> {
    let collection = state
        .collections
        .update_details(
            id,
            user.user(),
            request.title.as_deref(),
            request.description.as_deref(),
        )
        .await?;
    Ok(Json(collection))
}

/// DELETE /api/collections/:id
pub async fn delete_collection(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.collections.delete(id, user.user()).await?;
    Ok(Json(json!({ "message": "Collection deleted" })))
}

/// POST /api/collections/:id/cards
pub async fn append_cards(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<Uuid>,
    Json(request): Json<AppendCardsRequest>,
) -> ApiResult<Json<Collection>> {
    let collection = state
        .collections
        .append_cards(id, user.user(), request.cards)
        .await?;
    Ok(Json(collection))
}

/// DELETE /api/collections/:id/cards/:index
pub async fn remove_card(
    State(state): State<AppState>,
    user: MaybeUser,
    Path((id, index)): Path<(Uuid, usize)>,
) -> ApiResult<Json<Collection>> {
    let collection = state
        .collections
        .remove_card_at(id, user.user(), index)
        .await?;
    Ok(Json(collection))
}

/// POST /api/collections/:id/claim
pub async fn claim_collection(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Collection>> {
    Ok(Json(state.collections.claim(id, &user).await?))
}

/// GET /api/collections/:id/export
pub async fn export_collection(
    State(state): State<AppState>,
    user: MaybeUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let collection = state.collections.get(id, user.user()).await?;
    let csv = render_csv(&collection)?;
    let disposition = format!("attachment; filename=\"{}\"", export_filename(&collection));

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

pub fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/api/collections", post(create_collection).get(list_collections))
        .route(
            "/api/collections/:id",
            get(get_collection)
                .put(update_collection)
                .delete(delete_collection),
        )
        .route("/api/collections/:id/cards", post(append_cards))
        .route("/api/collections/:id/cards/:index", delete(remove_card))
        .route("/api/collections/:id/claim", post(claim_collection))
        .route("/api/collections/:id/export", get(export_collection))
}
