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
    study_session::{self, SessionOutcome, StartSessionRequest, StudySession},
};

#[utoipa::path(
    path = "/api/study-sessions",
    method(post),
    security(("bearer" = [])),
    request_body = StartSessionRequest,
    responses(
        (status = 201, description = "Session started", body = StudySession),
        (status = 404, description = "Unknown vocabulary list", body = ErrorBody)
    )
)]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(new): ValidJson<StartSessionRequest>,
) -> Result<(StatusCode, Json<StudySession>)> {
    let session = study_session::start_session(&state.database, user_id, new).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    path = "/api/study-sessions",
    method(get),
    security(("bearer" = [])),
    responses((status = 200, description = "The caller's sessions, newest first", body = Vec<StudySession>))
)]
pub async fn my_sessions(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<StudySession>>> {
    Ok(Json(
        study_session::sessions_by_user(&state.database, user_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/study-sessions",
    path = "/by-list/{list_id}",
    method(get),
    security(("bearer" = [])),
    params(("list_id" = i64, Path, description = "Vocabulary list id")),
    responses((status = 200, description = "The caller's sessions over that list", body = Vec<StudySession>))
)]
pub async fn sessions_by_list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(list_id): Path<i64>,
) -> Result<Json<Vec<StudySession>>> {
    Ok(Json(
        study_session::sessions_by_list(&state.database, user_id, list_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/study-sessions",
    path = "/{id}",
    method(get),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session", body = StudySession),
        (status = 403, description = "Not the caller's session", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<StudySession>> {
    Ok(Json(
        study_session::get_session(&state.database, id, user_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/study-sessions",
    path = "/{id}",
    method(delete),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Session id")),
    responses(
        (status = 204, description = "Session deleted"),
        (status = 403, description = "Not the caller's session", body = ErrorBody),
        (status = 404, description = "No such session", body = ErrorBody)
    )
)]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    study_session::delete_session(&state.database, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    context_path = "/api/study-sessions",
    path = "/{id}/complete",
    method(post),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Session id")),
    request_body = SessionOutcome,
    responses(
        (status = 200, description = "Completed session", body = StudySession),
        (status = 403, description = "Not the caller's session", body = ErrorBody),
        (status = 409, description = "Session already completed", body = ErrorBody)
    )
)]
pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    ValidJson(outcome): ValidJson<SessionOutcome>,
) -> Result<Json<StudySession>> {
    Ok(Json(
        study_session::complete_session(&state.database, id, user_id, outcome).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/study-sessions",
    path = "/{id}/pause",
    method(post),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Session id")),
    responses(
        (status = 200, description = "Paused session", body = StudySession),
        (status = 409, description = "Session is not active", body = ErrorBody)
    )
)]
pub async fn pause_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<StudySession>> {
    Ok(Json(
        study_session::pause_session(&state.database, id, user_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/study-sessions",
    path = "/{id}/resume",
    method(post),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Session id")),
    responses(
        (status = 200, description = "Active session", body = StudySession),
        (status = 409, description = "Session is not paused", body = ErrorBody)
    )
)]
pub async fn resume_session(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<StudySession>> {
    Ok(Json(
        study_session::resume_session(&state.database, id, user_id).await?,
    ))
}

pub fn get_study_session_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/study-sessions",
        Router::new()
            .route("/", get(my_sessions).post(start_session))
            .route("/by-list/{list_id}", get(sessions_by_list))
            .route("/{id}", get(get_session).delete(delete_session))
            .route("/{id}/complete", post(complete_session))
            .route("/{id}/pause", post(pause_session))
            .route("/{id}/resume", post(resume_session)),
    )
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;

    use crate::api::testing::TestApp;

    use super::*;

    #[tokio::test]
    async fn session_lifecycle_over_http() {
        let app = TestApp::new().await;
        let (alice, _) = app.register("alice").await;
        let (_, list) = app
            .request(
                Method::POST,
                "/api/vocab-lists",
                Some(&alice),
                Some(json!({ "title": "Empty" })),
            )
            .await;
        let list_id = list["id"].as_i64().unwrap();

        let (status, session) = app
            .request(
                Method::POST,
                "/api/study-sessions",
                Some(&alice),
                Some(json!({ "vocab_list_ids": [list_id] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{session}");
        assert_eq!(session["status"], "active");
        let id = session["id"].as_i64().unwrap();

        let (status, body) = app
            .request(Method::POST, &format!("/api/study-sessions/{id}/resume"), Some(&alice), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "INVALID_STATE");

        let complete = format!("/api/study-sessions/{id}/complete");
        let (status, _) = app
            .request(
                Method::POST,
                &complete,
                Some(&alice),
                Some(json!({ "items_studied": 2, "correct_answers": 3 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, done) = app
            .request(
                Method::POST,
                &complete,
                Some(&alice),
                Some(json!({ "duration": 12, "items_studied": 8, "correct_answers": 6 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["status"], "completed");
        assert_eq!(done["accuracy"], 75.0);

        let (status, _) = app
            .request(
                Method::POST,
                &complete,
                Some(&alice),
                Some(json!({ "items_studied": 1, "correct_answers": 1 })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, by_list) = app
            .request(
                Method::GET,
                &format!("/api/study-sessions/by-list/{list_id}"),
                Some(&alice),
                None,
            )
            .await;
        assert_eq!(by_list.as_array().unwrap().len(), 1);
    }
}
