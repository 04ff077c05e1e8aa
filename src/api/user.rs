use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use super::{AppState, AuthUser, ValidJson};
use crate::{
    error::{ErrorBody, Result},
    user::{self, LoginRequest, RegisterRequest, UpdateUserRequest, UserInfo},
};

#[derive(Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/register",
    method(post),
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email or username taken", body = ErrorBody)
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    ValidJson(new): ValidJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let user = user::create_user(&state.database, new).await?;
    let token = state.keys.issue(user.id)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/login",
    method(post),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid email or password", body = ErrorBody)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = user::authenticate(&state.database, &req.email, &req.password).await?;
    let token = state.keys.issue(user.id)?;
    info!("user {} logged in", user.id);
    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/me",
    method(get),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The current user", body = UserInfo),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    )
)]
pub async fn me(State(state): State<Arc<AppState>>, AuthUser(user_id): AuthUser) -> Result<Json<UserInfo>> {
    Ok(Json(user::get_user(&state.database, user_id).await?))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/me",
    method(put),
    security(("bearer" = [])),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated user", body = UserInfo),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email or username taken", body = ErrorBody)
    )
)]
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(update): ValidJson<UpdateUserRequest>,
) -> Result<Json<UserInfo>> {
    Ok(Json(user::update_user(&state.database, user_id, update).await?))
}

#[utoipa::path(
    context_path = "/api/users",
    path = "/{id}",
    method(get),
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserInfo),
        (status = 404, description = "No such user", body = ErrorBody)
    )
)]
pub async fn get_user(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Result<Json<UserInfo>> {
    Ok(Json(user::get_user(&state.database, id).await?))
}

pub fn get_user_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/users",
        Router::new()
            .route("/register", post(register))
            .route("/login", post(login))
            .route("/me", get(me).put(update_me))
            .route("/{id}", get(get_user)),
    )
}
