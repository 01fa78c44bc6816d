use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::db::payment_store::PaymentRecordFilter;
use crate::responses::JsonResponse;
use crate::state::AppState;

// GET /api/deals/{deal_id}/payments
pub async fn list_deal_payments(
    State(state): State<AppState>,
    Path(deal_id): Path<i64>,
) -> Response {
    match state
        .store
        .list_payment_records(PaymentRecordFilter::for_deal(deal_id))
        .await
    {
        Ok(records) => Json(serde_json::json!({
            "success": true,
            "data": records,
        }))
        .into_response(),
        Err(err) => {
            error!(?err, deal_id, "failed to list payment records");
            JsonResponse::server_error("Could not load payments").into_response()
        }
    }
}
