//! Account HTTP API
//!
//! Thin wrappers over [`AccountService`]; validation and business rules
//! live in the service layer, errors map through `AppError`.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::AppResult;
use crate::model::Account;
use crate::service::AccountService;

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub user_id: String,
    pub amount: Decimal,
}

pub fn router(service: AccountService) -> Router {
    Router::new()
        .route("/api/accounts", post(create_account))
        .route("/api/accounts/topup", post(top_up))
        .route("/api/accounts/{user_id}", get(get_account))
        .with_state(service)
}

/// POST /api/accounts - create an account for an owner
pub async fn create_account(
    State(service): State<AccountService>,
    Json(req): Json<CreateAccountRequest>,
) -> AppResult<Json<Account>> {
    Ok(Json(service.create_account(&req.user_id)?))
}

/// POST /api/accounts/topup - add funds to an account
pub async fn top_up(
    State(service): State<AccountService>,
    Json(req): Json<TopUpRequest>,
) -> AppResult<Json<Account>> {
    Ok(Json(service.top_up(&req.user_id, req.amount)?))
}

/// GET /api/accounts/{user_id} - fetch an account by owner id
pub async fn get_account(
    State(service): State<AccountService>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Account>> {
    Ok(Json(service.get_account(&user_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LedgerStorage;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    fn app() -> Router {
        let storage = LedgerStorage::open_in_memory().unwrap();
        router(AccountService::new(storage))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn create_then_fetch_account() {
        let app = app();

        let created = app
            .clone()
            .oneshot(post_json("/api/accounts", r#"{"user_id":"u1"}"#))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::OK);

        let fetched = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/accounts/u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(fetched.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["balance"], 0.0);

        let duplicate = app
            .oneshot(post_json("/api/accounts", r#"{"user_id":"u1"}"#))
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn non_positive_top_up_is_a_bad_request() {
        let app = app();
        app.clone()
            .oneshot(post_json("/api/accounts", r#"{"user_id":"u1"}"#))
            .await
            .unwrap();

        let response = app
            .oneshot(post_json(
                "/api/accounts/topup",
                r#"{"user_id":"u1","amount":0}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "E4000");
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/accounts/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
