use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use super::{AppState, AuthUser, ValidJson};
use crate::{
    error::{ErrorBody, Result},
    vocab_item::VocabItem,
    vocab_list::{self, VocabList, VocabListInput, VocabListPatchInput},
};

#[utoipa::path(
    path = "/api/vocab-lists",
    method(get),
    responses((status = 200, description = "All vocabulary lists", body = Vec<VocabList>))
)]
pub async fn list_lists(State(state): State<Arc<AppState>>) -> Result<Json<Vec<VocabList>>> {
    Ok(Json(vocab_list::list_lists(&state.database).await?))
}

#[utoipa::path(
    path = "/api/vocab-lists",
    method(post),
    security(("bearer" = [])),
    request_body = VocabListInput,
    responses(
        (status = 201, description = "List created", body = VocabList),
        (status = 400, description = "Invalid input or unknown items", body = ErrorBody)
    )
)]
pub async fn create_list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(new): ValidJson<VocabListInput>,
) -> Result<(StatusCode, Json<VocabList>)> {
    let list = vocab_list::create_list(&state.database, user_id, new).await?;
    Ok((StatusCode::CREATED, Json(list)))
}

#[utoipa::path(
    context_path = "/api/vocab-lists",
    path = "/mine",
    method(get),
    security(("bearer" = [])),
    responses((status = 200, description = "Lists created by the caller", body = Vec<VocabList>))
)]
pub async fn my_lists(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<VocabList>>> {
    Ok(Json(
        vocab_list::lists_by_creator(&state.database, user_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/vocab-lists",
    path = "/{id}",
    method(get),
    params(("id" = i64, Path, description = "List id")),
    responses(
        (status = 200, description = "List", body = VocabList),
        (status = 404, description = "No such list", body = ErrorBody)
    )
)]
pub async fn get_list(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<VocabList>> {
    Ok(Json(vocab_list::get_list(&state.database, id).await?))
}

#[utoipa::path(
    context_path = "/api/vocab-lists",
    path = "/{id}",
    method(put),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "List id")),
    request_body = VocabListPatchInput,
    responses(
        (status = 200, description = "Updated list", body = VocabList),
        (status = 403, description = "Not the creator", body = ErrorBody),
        (status = 404, description = "No such list", body = ErrorBody)
    )
)]
pub async fn update_list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    ValidJson(patch): ValidJson<VocabListPatchInput>,
) -> Result<Json<VocabList>> {
    Ok(Json(
        vocab_list::update_list(&state.database, id, user_id, patch).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/vocab-lists",
    path = "/{id}",
    method(delete),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "List id")),
    responses(
        (status = 204, description = "List deleted"),
        (status = 403, description = "Not the creator", body = ErrorBody),
        (status = 404, description = "No such list", body = ErrorBody)
    )
)]
pub async fn delete_list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    vocab_list::delete_list(&state.database, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    context_path = "/api/vocab-lists",
    path = "/{id}/items",
    method(get),
    params(("id" = i64, Path, description = "List id")),
    responses(
        (status = 200, description = "The list's items in order", body = Vec<VocabItem>),
        (status = 404, description = "No such list", body = ErrorBody)
    )
)]
pub async fn list_items(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<Vec<VocabItem>>> {
    Ok(Json(vocab_list::list_items(&state.database, id).await?))
}

#[utoipa::path(
    context_path = "/api/vocab-lists",
    path = "/{id}/items/{item_id}",
    method(post),
    security(("bearer" = [])),
    params(
        ("id" = i64, Path, description = "List id"),
        ("item_id" = i64, Path, description = "Item to append")
    ),
    responses(
        (status = 200, description = "Updated list", body = VocabList),
        (status = 400, description = "Item already in the list", body = ErrorBody),
        (status = 404, description = "No such list or item", body = ErrorBody)
    )
)]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((id, item_id)): Path<(i64, i64)>,
) -> Result<Json<VocabList>> {
    Ok(Json(
        vocab_list::add_item(&state.database, id, item_id, user_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/vocab-lists",
    path = "/{id}/items/{item_id}",
    method(delete),
    security(("bearer" = [])),
    params(
        ("id" = i64, Path, description = "List id"),
        ("item_id" = i64, Path, description = "Item to remove")
    ),
    responses(
        (status = 200, description = "Updated list", body = VocabList),
        (status = 400, description = "Item not in the list", body = ErrorBody),
        (status = 404, description = "No such list", body = ErrorBody)
    )
)]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((id, item_id)): Path<(i64, i64)>,
) -> Result<Json<VocabList>> {
    Ok(Json(
        vocab_list::remove_item(&state.database, id, item_id, user_id).await?,
    ))
}

pub fn get_vocab_list_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/vocab-lists",
        Router::new()
            .route("/", get(list_lists).post(create_list))
            .route("/mine", get(my_lists))
            .route("/{id}", get(get_list).put(update_list).delete(delete_list))
            .route("/{id}/items", get(list_items))
            .route("/{id}/items/{item_id}", post(add_item).delete(remove_item)),
    )
}
