//! Order HTTP API
//!
//! Thin wrappers over [`OrderService`]; validation and business rules live
//! in the service layer, errors map through `AppError`.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::AppResult;
use crate::model::Order;
use crate::service::OrderService;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: String,
    pub amount: Decimal,
    pub description: String,
}

pub fn router(service: OrderService) -> Router {
    Router::new()
        .route("/api/orders", post(create_order))
        .route("/api/orders/{order_id}", get(get_order))
        .route("/api/orders/user/{user_id}", get(get_user_orders))
        .with_state(service)
}

/// POST /api/orders - create an order and queue its payment
pub async fn create_order(
    State(service): State<OrderService>,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<Json<Order>> {
    Ok(Json(service.create_order(
        &req.user_id,
        req.amount,
        &req.description,
    )?))
}

/// GET /api/orders/{order_id} - fetch one order
pub async fn get_order(
    State(service): State<OrderService>,
    Path(order_id): Path<String>,
) -> AppResult<Json<Order>> {
    Ok(Json(service.get_order(&order_id)?))
}

/// GET /api/orders/user/{user_id} - all orders of an owner, newest first
pub async fn get_user_orders(
    State(service): State<OrderService>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<Order>>> {
    Ok(Json(service.get_user_orders(&user_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::OrderNotifier;
    use crate::storage::OrderStorage;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    fn app() -> Router {
        let storage = OrderStorage::open_in_memory().unwrap();
        router(OrderService::new(storage, OrderNotifier::new()))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_then_fetch_order() {
        let app = app();

        let created = app
            .clone()
            .oneshot(post_json(
                "/api/orders",
                r#"{"user_id":"u1","amount":150,"description":"a keyboard"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::OK);
        let created = body_json(created).await;
        assert_eq!(created["status"], "New");
        let order_id = created["id"].as_str().unwrap().to_string();

        let fetched = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/orders/{order_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(fetched.status(), StatusCode::OK);
        let fetched = body_json(fetched).await;
        assert_eq!(fetched["user_id"], "u1");
        assert_eq!(fetched["description"], "a keyboard");
    }

    #[tokio::test]
    async fn non_positive_amount_is_a_bad_request() {
        let response = app()
            .oneshot(post_json(
                "/api/orders",
                r#"{"user_id":"u1","amount":-5,"description":"bad"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["code"], "E4000");
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/orders/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn user_listing_only_returns_that_owner() {
        let app = app();
        for (user, desc) in [("u1", "first"), ("u1", "second"), ("u2", "other")] {
            let body = format!(r#"{{"user_id":"{user}","amount":10,"description":"{desc}"}}"#);
            app.clone()
                .oneshot(post_json("/api/orders", &body))
                .await
                .unwrap();
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/orders/user/u1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 2);
    }
}
