use axum::routing::{get, post};
use axum::{response::IntoResponse, Router};

use crate::responses::JsonResponse;
use crate::state::AppState;

pub mod payments;
pub mod webhooks;

async fn health() -> impl IntoResponse {
    JsonResponse::success("ok")
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/webhooks/deal", post(webhooks::deal_webhook))
        .route(
            "/api/deals/{deal_id}/payments",
            get(payments::list_deal_payments),
        )
        .with_state(state)
}
