use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post, put},
};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::ToSchema;

use super::{AppState, AuthUser, ValidJson};
use crate::{
    error::{Error, ErrorBody, Result},
    progress::{ItemProgress, UserProgress, UserStats, mastery::MAX_MASTERY, stats::MasteryStats},
    validation::{Validate, ValidationErrors, Validator},
    vocab_item,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AttemptRequest {
    pub item_id: i64,
    pub correct: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MasteryRequest {
    /// 0 to 100
    pub mastery_level: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StudyTimeRequest {
    pub minutes: i64,
}

impl Validate for AttemptRequest {
    type Valid = AttemptRequest;

    fn validate(self) -> std::result::Result<AttemptRequest, ValidationErrors> {
        Ok(self)
    }
}

impl Validate for MasteryRequest {
    type Valid = i64;

    fn validate(self) -> std::result::Result<i64, ValidationErrors> {
        let mut v = Validator::new();
        let level = v.range("mastery_level", self.mastery_level, 0, MAX_MASTERY);
        v.finish(level)
    }
}

impl Validate for StudyTimeRequest {
    type Valid = i64;

    fn validate(self) -> std::result::Result<i64, ValidationErrors> {
        let mut v = Validator::new();
        v.check(self.minutes > 0, "minutes", "must be positive");
        v.finish(self.minutes)
    }
}

async fn ensure_item(state: &AppState, item_id: i64) -> Result<()> {
    if !vocab_item::item_exists(&state.database, item_id).await? {
        return Err(Error::not_found("Vocabulary item"));
    }
    Ok(())
}

#[utoipa::path(
    path = "/api/progress",
    method(get),
    security(("bearer" = [])),
    responses((status = 200, description = "The caller's progress", body = UserProgress))
)]
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserProgress>> {
    Ok(Json(state.tracker.get_user_progress(user_id).await?))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/stats",
    method(get),
    security(("bearer" = [])),
    responses((status = 200, description = "Summary counters", body = UserStats))
)]
pub async fn get_stats(State(state): State<Arc<AppState>>, AuthUser(user_id): AuthUser) -> Result<Json<UserStats>> {
    Ok(Json(state.tracker.get_user_stats(user_id).await?))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/mastery",
    method(get),
    security(("bearer" = [])),
    responses((status = 200, description = "Mastery summary", body = MasteryStats))
)]
pub async fn get_mastery(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MasteryStats>> {
    Ok(Json(state.tracker.mastery_stats(user_id).await?))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/due",
    method(get),
    security(("bearer" = [])),
    responses((status = 200, description = "Items due for review, soonest first", body = Vec<ItemProgress>))
)]
pub async fn get_due_items(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<ItemProgress>>> {
    Ok(Json(
        state
            .tracker
            .due_items(user_id, OffsetDateTime::now_utc())
            .await?,
    ))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/items/{item_id}",
    method(get),
    security(("bearer" = [])),
    params(("item_id" = i64, Path, description = "Vocabulary item id")),
    responses(
        (status = 200, description = "Record for the item, zeroed if never studied", body = ItemProgress),
        (status = 404, description = "No such item", body = ErrorBody)
    )
)]
pub async fn get_item_progress(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(item_id): Path<i64>,
) -> Result<Json<ItemProgress>> {
    ensure_item(&state, item_id).await?;
    Ok(Json(
        state.tracker.get_item_progress(user_id, item_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/attempts",
    method(post),
    security(("bearer" = [])),
    request_body = AttemptRequest,
    responses(
        (status = 200, description = "Updated progress", body = UserProgress),
        (status = 404, description = "No such item", body = ErrorBody),
        (status = 409, description = "Concurrent modification", body = ErrorBody)
    )
)]
pub async fn record_attempt(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(req): ValidJson<AttemptRequest>,
) -> Result<Json<UserProgress>> {
    ensure_item(&state, req.item_id).await?;
    Ok(Json(
        state
            .tracker
            .record_attempt(user_id, req.item_id, req.correct)
            .await?,
    ))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/items/{item_id}/mastery",
    method(put),
    security(("bearer" = [])),
    params(("item_id" = i64, Path, description = "Vocabulary item id")),
    request_body = MasteryRequest,
    responses(
        (status = 200, description = "Updated item record", body = ItemProgress),
        (status = 400, description = "Mastery out of range", body = ErrorBody),
        (status = 404, description = "No such item", body = ErrorBody)
    )
)]
pub async fn set_item_mastery(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(item_id): Path<i64>,
    ValidJson(mastery): ValidJson<MasteryRequest>,
) -> Result<Json<ItemProgress>> {
    ensure_item(&state, item_id).await?;
    Ok(Json(
        state
            .tracker
            .set_item_mastery(user_id, item_id, mastery)
            .await?,
    ))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/study-time",
    method(post),
    security(("bearer" = [])),
    request_body = StudyTimeRequest,
    responses(
        (status = 200, description = "Updated stats", body = UserStats),
        (status = 400, description = "Minutes not positive", body = ErrorBody)
    )
)]
pub async fn log_study_time(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(minutes): ValidJson<StudyTimeRequest>,
) -> Result<Json<UserStats>> {
    Ok(Json(state.tracker.log_study_time(user_id, minutes).await?))
}

#[utoipa::path(
    context_path = "/api/progress",
    path = "/reset",
    method(post),
    security(("bearer" = [])),
    responses((status = 200, description = "Cleared progress", body = UserProgress))
)]
pub async fn reset_progress(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserProgress>> {
    Ok(Json(state.tracker.reset(user_id).await?))
}

pub fn get_progress_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/progress",
        Router::new()
            .route("/", get(get_progress))
            .route("/stats", get(get_stats))
            .route("/mastery", get(get_mastery))
            .route("/due", get(get_due_items))
            .route("/items/{item_id}", get(get_item_progress))
            .route("/items/{item_id}/mastery", put(set_item_mastery))
            .route("/attempts", post(record_attempt))
            .route("/study-time", post(log_study_time))
            .route("/reset", post(reset_progress)),
    )
}
