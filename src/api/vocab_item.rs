use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;
use utoipa::IntoParams;

use super::{AppState, AuthUser, ValidJson};
use crate::{
    error::{ErrorBody, Result},
    vocab_item::{self, VocabItem, VocabItemInput, VocabItemPatch},
};

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Case-insensitive substring of the term or either definition
    pub query: String,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TagsQuery {
    /// Comma separated tags; items with any of them match
    pub tags: String,
}

#[utoipa::path(
    path = "/api/vocab-items",
    method(get),
    responses((status = 200, description = "All vocabulary items", body = Vec<VocabItem>))
)]
pub async fn list_items(State(state): State<Arc<AppState>>) -> Result<Json<Vec<VocabItem>>> {
    Ok(Json(vocab_item::list_items(&state.database).await?))
}

#[utoipa::path(
    path = "/api/vocab-items",
    method(post),
    security(("bearer" = [])),
    request_body = VocabItemInput,
    responses(
        (status = 201, description = "Item created", body = VocabItem),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    )
)]
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(new): ValidJson<VocabItemInput>,
) -> Result<(StatusCode, Json<VocabItem>)> {
    let item = vocab_item::create_item(&state.database, user_id, new).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[utoipa::path(
    context_path = "/api/vocab-items",
    path = "/search",
    method(get),
    params(SearchQuery),
    responses((status = 200, description = "Matching items", body = Vec<VocabItem>))
)]
pub async fn search_items(
    State(state): State<Arc<AppState>>,
    Query(SearchQuery { query }): Query<SearchQuery>,
) -> Result<Json<Vec<VocabItem>>> {
    Ok(Json(vocab_item::search_items(&state.database, &query).await?))
}

#[utoipa::path(
    context_path = "/api/vocab-items",
    path = "/by-tags",
    method(get),
    params(TagsQuery),
    responses((status = 200, description = "Items with any of the tags", body = Vec<VocabItem>))
)]
pub async fn items_by_tags(
    State(state): State<Arc<AppState>>,
    Query(TagsQuery { tags }): Query<TagsQuery>,
) -> Result<Json<Vec<VocabItem>>> {
    let tags: Vec<String> = tags
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    Ok(Json(vocab_item::items_by_tags(&state.database, &tags).await?))
}

#[utoipa::path(
    context_path = "/api/vocab-items",
    path = "/by-difficulty/{difficulty}",
    method(get),
    params(("difficulty" = i64, Path, description = "Difficulty rating, 1 to 5")),
    responses(
        (status = 200, description = "Items of that difficulty", body = Vec<VocabItem>),
        (status = 400, description = "Difficulty out of range", body = ErrorBody)
    )
)]
pub async fn items_by_difficulty(
    State(state): State<Arc<AppState>>,
    Path(difficulty): Path<i64>,
) -> Result<Json<Vec<VocabItem>>> {
    Ok(Json(
        vocab_item::items_by_difficulty(&state.database, difficulty).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/vocab-items",
    path = "/{id}",
    method(get),
    params(("id" = i64, Path, description = "Item id")),
    responses(
        (status = 200, description = "Item", body = VocabItem),
        (status = 404, description = "No such item", body = ErrorBody)
    )
)]
pub async fn get_item(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<VocabItem>> {
    Ok(Json(vocab_item::get_item(&state.database, id).await?))
}

#[utoipa::path(
    context_path = "/api/vocab-items",
    path = "/{id}",
    method(put),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Item id")),
    request_body = VocabItemPatch,
    responses(
        (status = 200, description = "Updated item", body = VocabItem),
        (status = 403, description = "Not the creator", body = ErrorBody),
        (status = 404, description = "No such item", body = ErrorBody)
    )
)]
pub async fn update_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    ValidJson(patch): ValidJson<VocabItemPatch>,
) -> Result<Json<VocabItem>> {
    Ok(Json(
        vocab_item::update_item(&state.database, id, user_id, patch).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/vocab-items",
    path = "/{id}",
    method(delete),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Item id")),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 403, description = "Not the creator", body = ErrorBody),
        (status = 404, description = "No such item", body = ErrorBody)
    )
)]
pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    vocab_item::delete_item(&state.database, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn get_vocab_item_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/vocab-items",
        Router::new()
            .route("/", get(list_items).post(create_item))
            .route("/search", get(search_items))
            .route("/by-tags", get(items_by_tags))
            .route("/by-difficulty/{difficulty}", get(items_by_difficulty))
            .route("/{id}", get(get_item).put(update_item).delete(delete_item)),
    )
}
