use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};

use super::{AppState, AuthUser, ValidJson};
use crate::{
    error::{ErrorBody, Result},
    test_result::{self, TestResult, TestSubmission},
};

#[utoipa::path(
    path = "/api/test-results",
    method(post),
    security(("bearer" = [])),
    request_body = TestSubmission,
    responses(
        (status = 201, description = "Graded result", body = TestResult),
        (status = 400, description = "Invalid answers", body = ErrorBody),
        (status = 404, description = "No such test", body = ErrorBody)
    )
)]
pub async fn submit_result(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    ValidJson(submission): ValidJson<TestSubmission>,
) -> Result<(StatusCode, Json<TestResult>)> {
    let result =
        test_result::submit_result(&state.database, &state.tracker, user_id, submission).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[utoipa::path(
    path = "/api/test-results",
    method(get),
    security(("bearer" = [])),
    responses((status = 200, description = "The caller's results, newest first", body = Vec<TestResult>))
)]
pub async fn my_results(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<TestResult>>> {
    Ok(Json(
        test_result::results_by_user(&state.database, user_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/test-results",
    path = "/{id}",
    method(get),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Result id")),
    responses(
        (status = 200, description = "Result", body = TestResult),
        (status = 403, description = "Not the caller's result", body = ErrorBody),
        (status = 404, description = "No such result", body = ErrorBody)
    )
)]
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<TestResult>> {
    Ok(Json(
        test_result::get_result(&state.database, id, user_id).await?,
    ))
}

#[utoipa::path(
    context_path = "/api/test-results",
    path = "/{id}",
    method(delete),
    security(("bearer" = [])),
    params(("id" = i64, Path, description = "Result id")),
    responses(
        (status = 204, description = "Result deleted"),
        (status = 403, description = "Not the caller's result", body = ErrorBody),
        (status = 404, description = "No such result", body = ErrorBody)
    )
)]
pub async fn delete_result(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    test_result::delete_result(&state.database, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    context_path = "/api/test-results",
    path = "/by-test/{test_id}",
    method(get),
    security(("bearer" = [])),
    params(("test_id" = i64, Path, description = "Test id")),
    responses(
        (status = 200, description = "All results for the creator, own results otherwise", body = Vec<TestResult>),
        (status = 404, description = "No such test", body = ErrorBody)
    )
)]
pub async fn results_by_test(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(test_id): Path<i64>,
) -> Result<Json<Vec<TestResult>>> {
    Ok(Json(
        test_result::results_by_test(&state.database, test_id, user_id).await?,
    ))
}

pub fn get_test_result_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/test-results",
        Router::new()
            .route("/", get(my_results).post(submit_result))
            .route("/by-test/{test_id}", get(results_by_test))
            .route("/{id}", get(get_result).delete(delete_result)),
    )
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::json;

    use crate::api::{testing::TestApp, vocab_test::tests::published_test};

    use super::*;

    #[tokio::test]
    async fn submit_and_read_back() {
        let app = TestApp::new().await;
        let (alice, _) = app.register("alice").await;
        let (bob, _) = app.register("bobby").await;
        let test_id = published_test(&app, &alice).await;
        let (_, test) = app
            .request(Method::GET, &format!("/api/tests/{test_id}"), None, None)
            .await;
        let right = test["questions"][0]["correct_option_index"].as_u64().unwrap();

        let (status, result) = app
            .request(
                Method::POST,
                "/api/test-results",
                Some(&bob),
                Some(json!({
                    "test_id": test_id,
                    "responses": [{ "question_index": 0, "answer": right, "time_spent": 4 }],
                    "completion_time": 30
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{result}");
        assert_eq!(result["correct_answers"], 1);
        assert_eq!(result["score"], 50.0);

        let (_, stats) = app
            .request(Method::GET, "/api/progress/stats", Some(&bob), None)
            .await;
        assert_eq!(stats["average_test_score"], 50.0);

        let id = result["id"].as_i64().unwrap();
        let (status, _) = app
            .request(Method::GET, &format!("/api/test-results/{id}"), Some(&alice), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (_, all) = app
            .request(
                Method::GET,
                &format!("/api/test-results/by-test/{test_id}"),
                Some(&alice),
                None,
            )
            .await;
        assert_eq!(all.as_array().unwrap().len(), 1);

        let (status, _) = app
            .request(Method::DELETE, &format!("/api/test-results/{id}"), Some(&bob), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, mine) = app
            .request(Method::GET, "/api/test-results", Some(&bob), None)
            .await;
        assert!(mine.as_array().unwrap().is_empty());
    }
}
