pub mod progress;
pub mod study_session;
pub mod test_result;
pub mod user;
pub mod vocab_item;
pub mod vocab_list;

use std::{sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Request, State},
    http::request::Parts,
    routing::get,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    Modify, OpenApi, ToSchema,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{
    auth::TokenKeys,
    config::Config,
    db,
    error::{Error, ErrorBody},
    progress::ProgressTracker,
    validation::Validate,
};

/// Shared by every handler.
pub struct AppState {
    pub database: SqlitePool,
    pub config: Config,
    pub keys: TokenKeys,
    pub tracker: ProgressTracker,
    started_at: Instant,
}

impl AppState {
    pub fn new(database: SqlitePool, config: Config) -> Self {
        let keys = TokenKeys::new(config.jwt_secret.as_bytes(), config.token_ttl());
        let tracker = ProgressTracker::new(database.clone(), config.utc_offset());
        Self {
            database,
            config,
            keys,
            tracker,
            started_at: Instant::now(),
        }
    }
}

/// The caller's user id, taken from a valid bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub i64);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| Error::Unauthenticated)?;
        let user_id = state.keys.verify(bearer.token())?;
        Ok(AuthUser(user_id))
    }
}

/// JSON body that has passed [`Validate`]. Holds the validated value.
pub struct ValidJson<T: Validate>(pub T::Valid);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: Validate + DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(payload) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| Error::invalid("body", e.body_text()))?;
        Ok(ValidJson(payload.validate()?))
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthStatus {
    /// Seconds since the server started
    pub uptime: f64,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub database: String,
    pub environment: String,
}

#[utoipa::path(
    path = "/health",
    method(get),
    responses((status = 200, description = "Server status", body = HealthStatus))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let database = if db::is_alive(&state.database).await {
        "connected"
    } else {
        "disconnected"
    };
    Json(HealthStatus {
        uptime: state.started_at.elapsed().as_secs_f64(),
        message: "OK".to_string(),
        timestamp: OffsetDateTime::now_utc(),
        database: database.to_string(),
        environment: state.config.environment.clone(),
    })
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        user::register,
        user::login,
        user::me,
        user::update_me,
        user::get_user,
        vocab_item::list_items,
        vocab_item::create_item,
        vocab_item::search_items,
        vocab_item::items_by_tags,
        vocab_item::items_by_difficulty,
        vocab_item::get_item,
        vocab_item::update_item,
        vocab_item::delete_item,
        vocab_list::list_lists,
        vocab_list::create_list,
        vocab_list::my_lists,
        vocab_list::get_list,
        vocab_list::update_list,
        vocab_list::delete_list,
        vocab_list::list_items,
        vocab_list::add_item,
        vocab_list::remove_item,
        vocab_test::list_tests,
        vocab_test::create_test,
        vocab_test::my_tests,
        vocab_test::available_tests,
        vocab_test::get_test,
        vocab_test::update_test,
        vocab_test::delete_test,
        vocab_test::publish_test,
        test_result::submit_result,
        test_result::my_results,
        test_result::get_result,
        test_result::delete_result,
        test_result::results_by_test,
        study_session::start_session,
        study_session::my_sessions,
        study_session::sessions_by_list,
        study_session::get_session,
        study_session::delete_session,
        study_session::complete_session,
        study_session::pause_session,
        study_session::resume_session,
        progress::get_progress,
        progress::get_stats,
        progress::get_mastery,
        progress::get_due_items,
        progress::get_item_progress,
        progress::record_attempt,
        progress::set_item_mastery,
        progress::log_study_time,
        progress::reset_progress,
    ),
    components(schemas(ErrorBody)),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest(
            "/api",
            Router::new()
                .merge(user::get_user_scope())
                .merge(vocab_item::get_vocab_item_scope())
                .merge(vocab_list::get_vocab_list_scope())
                .merge(vocab_test::get_test_scope())
                .merge(test_result::get_test_result_scope())
                .merge(study_session::get_study_session_scope())
                .merge(progress::get_progress_scope()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}


#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use super::testing::TestApp;
    use super::*;

    #[tokio::test]
    async fn health_reports_database() {
        let app = TestApp::new().await;
        let (status, body) = app.request(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "OK");
        assert_eq!(body["database"], "connected");
        assert_eq!(body["environment"], "test");
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = TestApp::new().await;
        let (status, body) = app.request(Method::GET, "/api/users/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNAUTHENTICATED");
        let (status, _) = app
            .request(Method::GET, "/api/users/me", Some("garbage"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let app = TestApp::new().await;
        let (status, body) = app
            .request(
                Method::POST,
                "/api/users/login",
                None,
                Some(serde_json::json!({ "email": 5 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["validation_errors"][0]["path"], "body");
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let app = TestApp::new().await;
        let (status, body) = app
            .request(Method::GET, "/api-docs/openapi.json", None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/progress/attempts"].is_object());
        assert!(body["components"]["securitySchemes"]["bearer"].is_object());
    }

    #[test]
    fn every_route_is_documented() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.len() >= 30);
    }
}
