use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::models::deal::DealSnapshot;
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::signature::verify_signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WebhookAction {
    Payment,
    Refund,
    Deletion,
    Ignore,
}

impl WebhookAction {
    fn as_str(&self) -> &'static str {
        match self {
            WebhookAction::Payment => "payment",
            WebhookAction::Refund => "refund",
            WebhookAction::Deletion => "deletion",
            WebhookAction::Ignore => "ignored",
        }
    }
}

fn string_or_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(string_or_number)
}

/// Accepts both delivery shapes: the CRM's native change events
/// (`{"event": ..., "current": {...}, "previous": {...}}`) and the flat
/// payloads its automation webhooks send (`{"deal_id": ..., ...}`).
fn normalize_payload(payload: &Value, invoice_type_field: &str) -> Option<DealSnapshot> {
    if let Some(current) = payload.get("current").filter(|c| c.is_object()) {
        return Some(DealSnapshot {
            deal_id: current.get("id")?.as_i64()?,
            event: payload
                .get("event")
                .and_then(Value::as_str)
                .unwrap_or("updated.deal")
                .to_string(),
            status: field(current, "status"),
            stage_id: current.get("stage_id").and_then(Value::as_i64),
            invoice_type: field(current, invoice_type_field),
            lost_reason: field(current, "lost_reason"),
        });
    }

    Some(DealSnapshot {
        deal_id: payload.get("deal_id")?.as_i64()?,
        event: payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("automation")
            .to_string(),
        status: field(payload, "status"),
        stage_id: payload.get("stage_id").and_then(Value::as_i64),
        invoice_type: field(payload, invoice_type_field),
        lost_reason: field(payload, "lost_reason"),
    })
}

/// Lost deals win over classifier values: a lost deal with a refund-flavored
/// reason goes to the refund path, any other lost deal is torn down. Only
/// then does the invoice-type classifier get a say.
fn classify(snapshot: &DealSnapshot, state: &AppState) -> WebhookAction {
    let crm = &state.config.crm;

    if snapshot.status.as_deref() == Some("lost") {
        let refundish = snapshot
            .lost_reason
            .as_deref()
            .map(|reason| {
                reason
                    .to_lowercase()
                    .contains(&crm.refund_reason_marker.to_lowercase())
            })
            .unwrap_or(false);
        return if refundish {
            WebhookAction::Refund
        } else {
            WebhookAction::Deletion
        };
    }

    match snapshot.invoice_type.as_deref() {
        Some(v) if v == crm.delete_trigger_value => WebhookAction::Deletion,
        Some(v) if v == crm.payment_trigger_value => WebhookAction::Payment,
        _ => WebhookAction::Ignore,
    }
}

fn ack(extra: Value) -> Response {
    let mut body = serde_json::json!({ "received": true });
    if let (Some(obj), Some(more)) = (body.as_object_mut(), extra.as_object()) {
        obj.extend(more.clone());
    }
    Json(body).into_response()
}

// POST /api/webhooks/deal
pub async fn deal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if let Some(secret) = state.config.webhook_secret.as_deref() {
        let sig = headers
            .get("X-Signature")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, sig) {
            warn!("webhook signature verification failed");
            return JsonResponse::unauthorized("Invalid signature").into_response();
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            warn!(?err, "unparsable webhook body");
            return JsonResponse::bad_request("Invalid JSON body").into_response();
        }
    };

    let Some(snapshot) = normalize_payload(&payload, &state.config.crm.invoice_type_field)
    else {
        warn!("webhook payload carries no deal id");
        return JsonResponse::bad_request("No deal id in payload").into_response();
    };

    let action = classify(&snapshot, &state);
    if action == WebhookAction::Ignore {
        return ack(serde_json::json!({ "action": "ignored" }));
    }

    // Dedup first so replayed deliveries never even contend for the lock
    if !state.fingerprints.check_and_insert(&snapshot.fingerprint()) {
        info!(
            deal_id = snapshot.deal_id,
            event = %snapshot.event,
            "duplicate webhook delivery dropped"
        );
        return ack(serde_json::json!({ "duplicate": true }));
    }

    let Some(_guard) = state.deal_locks.acquire(snapshot.deal_id) else {
        info!(
            deal_id = snapshot.deal_id,
            "deal already being processed; acknowledging without work"
        );
        return ack(serde_json::json!({ "in_progress": true }));
    };

    let response = dispatch(&state, &snapshot, action).await;
    clear_trigger_field(&state, &snapshot).await;
    response
}

async fn dispatch(state: &AppState, snapshot: &DealSnapshot, action: WebhookAction) -> Response {
    let deal_id = snapshot.deal_id;
    let orchestrator = state.orchestrator();

    let result = match action {
        WebhookAction::Payment => orchestrator
            .run_payment(deal_id, "webhook")
            .await
            .map(|outcome| {
                serde_json::json!({
                    "action": "payment",
                    "schedule": outcome.decision.schedule.label(),
                    "created": outcome.created.len(),
                    "notified": outcome.notified,
                })
            }),
        WebhookAction::Refund => {
            let reason = snapshot.lost_reason.as_deref().unwrap_or("deal lost");
            orchestrator.run_refund(deal_id, reason).await.map(|summary| {
                serde_json::json!({
                    "action": "refund",
                    "refunded": summary.refunded,
                    "failed": summary.failed,
                })
            })
        }
        WebhookAction::Deletion => orchestrator.run_deletion(deal_id).await.map(|summary| {
            serde_json::json!({
                "action": "deletion",
                "expired": summary.expired,
                "failed": summary.failed,
            })
        }),
        WebhookAction::Ignore => unreachable!("ignored events are acked before dispatch"),
    };

    match result {
        Ok(extra) => ack(extra),
        Err(err) => {
            error!(?err, deal_id, action = action.as_str(), "orchestration failed");
            let note = format!("Automatic {} processing failed: {}", action.as_str(), err);
            if let Err(task_err) = state
                .crm
                .create_task(deal_id, "Payment automation failed", &note)
                .await
            {
                warn!(?task_err, deal_id, "could not create follow-up task");
            }
            // The delivery itself was handled; retries would hit the same error
            ack(serde_json::json!({
                "action": action.as_str(),
                "processed": false,
            }))
        }
    }
}

/// Resets the classifier so the CRM automation can be re-armed. Best effort:
/// the run already happened either way.
async fn clear_trigger_field(state: &AppState, snapshot: &DealSnapshot) {
    if snapshot.invoice_type.is_none() {
        return;
    }
    if let Err(err) = state
        .crm
        .update_deal_field(
            snapshot.deal_id,
            &state.config.crm.invoice_type_field,
            Value::Null,
        )
        .await
    {
        warn!(?err, deal_id = snapshot.deal_id, "failed to clear trigger field");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use time::OffsetDateTime;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::config::Config;
    use crate::db::mock_payment_store::MockPaymentStore;
    use crate::models::payment_record::{
        PaymentRecord, PaymentSchedule, PaymentSlot, PaymentStatus,
    };
    use crate::routes::api_router;
    use crate::services::crm::{Deal, DealLineItem, MockCrmService};
    use crate::services::messaging::MockMessenger;
    use crate::services::payments::{MockPaymentProvider, SessionState, SessionStatus};
    use crate::utils::signature::sign;

    struct Harness {
        crm: MockCrmService,
        provider: MockPaymentProvider,
        store: MockPaymentStore,
        messenger: MockMessenger,
        state: AppState,
    }

    fn harness_with_config(config: Config) -> Harness {
        let crm = MockCrmService::new();
        let provider = MockPaymentProvider::new();
        let store = MockPaymentStore::new();
        let messenger = MockMessenger::new();
        let state = AppState::new(
            Arc::new(crm.clone()),
            Arc::new(provider.clone()),
            Arc::new(store.clone()),
            Arc::new(messenger.clone()),
            Arc::new(config),
        );
        Harness {
            crm,
            provider,
            store,
            messenger,
            state,
        }
    }

    fn harness() -> Harness {
        harness_with_config(Config::test_defaults())
    }

    fn seed_payable_deal(h: &Harness, deal_id: i64) {
        h.crm.seed_deal(Deal {
            id: deal_id,
            title: "Canary islands".into(),
            value: Some(dec!(1000)),
            currency: "PLN".into(),
            status: "open".into(),
            stage_id: Some(2),
            expected_close_date: None,
            invoice_type: Some("auto_payment".into()),
            lost_reason: None,
            cash_prepaid: None,
            person_id: Some(1),
            org_id: None,
        });
        h.crm.seed_line_items(
            deal_id,
            vec![DealLineItem {
                product_id: 42,
                name: "Canary islands".into(),
                quantity: 1,
                unit_price: None,
                total: None,
                discount: None,
                discount_kind: None,
            }],
        );
        h.crm.seed_person_email(deal_id, "ana@example.com");
    }

    fn record(deal_id: i64, slot: PaymentSlot, status: PaymentStatus) -> PaymentRecord {
        PaymentRecord {
            id: Uuid::new_v4(),
            deal_id,
            session_id: format!("cs_{}_{}", deal_id, slot.as_str()),
            slot,
            schedule: PaymentSchedule::Full,
            amount: dec!(1000),
            currency: "PLN".into(),
            status,
            checkout_url: None,
            trigger: "webhook".into(),
            run_id: "run-0".into(),
            second_payment_date: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    async fn post_webhook(state: &AppState, body: serde_json::Value) -> (StatusCode, Value) {
        post_webhook_raw(state, body.to_string().into_bytes(), None).await
    }

    async fn post_webhook_raw(
        state: &AppState,
        body: Vec<u8>,
        signature: Option<&str>,
    ) -> (StatusCode, Value) {
        let app = api_router(state.clone());
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks/deal")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("X-Signature", sig);
        }
        let response = app
            .oneshot(builder.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn automation_payload(deal_id: i64) -> serde_json::Value {
        serde_json::json!({
            "deal_id": deal_id,
            "invoice_type": "auto_payment",
            "status": "open",
            "stage_id": 2,
        })
    }

    #[tokio::test]
    async fn payment_trigger_creates_a_session_and_acks() {
        let h = harness();
        seed_payable_deal(&h, 7);

        let (status, json) = post_webhook(&h.state, automation_payload(7)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["received"], true);
        assert_eq!(json["action"], "payment");
        assert_eq!(json["created"], 1);
        assert_eq!(h.provider.created_sessions.lock().unwrap().len(), 1);
        assert_eq!(h.messenger.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn structured_change_event_is_normalized() {
        let h = harness();
        seed_payable_deal(&h, 7);

        let payload = serde_json::json!({
            "event": "updated.deal",
            "current": {
                "id": 7,
                "status": "open",
                "stage_id": 2,
                "invoice_type": "auto_payment",
            },
            "previous": { "id": 7, "invoice_type": null },
        });
        let (status, json) = post_webhook(&h.state, payload).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["action"], "payment");
        assert_eq!(h.provider.created_sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn numeric_classifier_values_are_matched_as_strings() {
        let mut config = Config::test_defaults();
        config.crm.payment_trigger_value = "271".into();
        let h = harness_with_config(config);
        seed_payable_deal(&h, 7);

        let payload = serde_json::json!({
            "deal_id": 7,
            "invoice_type": 271,
        });
        let (_, json) = post_webhook(&h.state, payload).await;

        assert_eq!(json["action"], "payment");
        assert_eq!(h.provider.created_sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_dropped_after_the_first() {
        let h = harness();
        seed_payable_deal(&h, 7);

        let (_, first) = post_webhook(&h.state, automation_payload(7)).await;
        let (status, second) = post_webhook(&h.state, automation_payload(7)).await;

        assert_eq!(first["action"], "payment");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["duplicate"], true);
        // only the first delivery did any work
        assert_eq!(h.provider.created_sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn held_deal_lock_short_circuits_processing() {
        let h = harness();
        seed_payable_deal(&h, 7);
        let _guard = h.state.deal_locks.acquire(7).unwrap();

        let (status, json) = post_webhook(&h.state, automation_payload(7)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["in_progress"], true);
        assert!(h.provider.created_sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn simultaneous_deliveries_yield_one_dispatch_and_one_in_progress() {
        let h = harness();
        seed_payable_deal(&h, 7);
        // keep the first handler inside the locked section long enough for
        // the second delivery to actually contend
        h.crm.set_latency(std::time::Duration::from_millis(50));

        // distinct stage ids so the dedup cache sees two different events
        let mut first = automation_payload(7);
        first["stage_id"] = serde_json::json!(2);
        let mut second = automation_payload(7);
        second["stage_id"] = serde_json::json!(3);

        let (a, b) = tokio::join!(
            post_webhook(&h.state, first),
            post_webhook(&h.state, second)
        );

        assert_eq!(a.0, StatusCode::OK);
        assert_eq!(b.0, StatusCode::OK);
        let bodies = [a.1, b.1];
        assert_eq!(
            bodies.iter().filter(|j| j["action"] == "payment").count(),
            1
        );
        assert_eq!(
            bodies.iter().filter(|j| j["in_progress"] == true).count(),
            1
        );
        assert_eq!(h.provider.created_sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lost_deal_with_refund_reason_refunds_paid_records() {
        let h = harness();
        let paid = record(7, PaymentSlot::Single, PaymentStatus::Paid);
        h.provider.script_session_state(SessionState {
            id: paid.session_id.clone(),
            status: SessionStatus::Complete,
            paid: true,
            payment_intent: Some("pi_paid".into()),
        });
        h.store.seed_record(paid);

        let payload = serde_json::json!({
            "deal_id": 7,
            "status": "lost",
            "lost_reason": "Customer requested refund",
        });
        let (_, json) = post_webhook(&h.state, payload).await;

        assert_eq!(json["action"], "refund");
        assert_eq!(json["refunded"], 1);
        assert_eq!(
            h.provider.refunds.lock().unwrap().as_slice(),
            ["pi_paid"]
        );
        let records = h.store.records.lock().unwrap();
        assert_eq!(records[0].status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn lost_deal_without_refund_reason_expires_open_sessions() {
        let h = harness();
        let open = record(7, PaymentSlot::Single, PaymentStatus::Unpaid);
        h.provider.script_session_state(SessionState {
            id: open.session_id.clone(),
            status: SessionStatus::Open,
            paid: false,
            payment_intent: None,
        });
        h.store.seed_record(open.clone());

        let payload = serde_json::json!({
            "deal_id": 7,
            "status": "lost",
            "lost_reason": "Went with a competitor",
        });
        let (_, json) = post_webhook(&h.state, payload).await;

        assert_eq!(json["action"], "deletion");
        assert_eq!(json["expired"], 1);
        assert_eq!(
            h.provider.expired_sessions.lock().unwrap().as_slice(),
            [open.session_id]
        );
    }

    #[tokio::test]
    async fn delete_classifier_expires_sessions_too() {
        let h = harness();
        let open = record(7, PaymentSlot::Single, PaymentStatus::Unpaid);
        h.provider.script_session_state(SessionState {
            id: open.session_id.clone(),
            status: SessionStatus::Open,
            paid: false,
            payment_intent: None,
        });
        h.store.seed_record(open);

        let payload = serde_json::json!({
            "deal_id": 7,
            "invoice_type": "delete",
        });
        let (_, json) = post_webhook(&h.state, payload).await;

        assert_eq!(json["action"], "deletion");
        assert_eq!(json["expired"], 1);
    }

    #[tokio::test]
    async fn unrelated_update_is_ignored() {
        let h = harness();
        seed_payable_deal(&h, 7);

        let payload = serde_json::json!({
            "deal_id": 7,
            "status": "open",
            "stage_id": 4,
        });
        let (status, json) = post_webhook(&h.state, payload).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["action"], "ignored");
        assert!(h.provider.created_sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trigger_field_is_cleared_after_the_run() {
        let h = harness();
        seed_payable_deal(&h, 7);

        post_webhook(&h.state, automation_payload(7)).await;

        let updates = h.crm.field_updates.lock().unwrap();
        assert!(updates
            .iter()
            .any(|(id, f, v)| *id == 7 && f == "invoice_type" && v.is_null()));
    }

    #[tokio::test]
    async fn orchestration_failure_still_acks_and_leaves_a_task() {
        let h = harness();
        // deal exists but has no line items and no email
        h.crm.seed_deal(Deal {
            id: 7,
            title: "Broken deal".into(),
            value: Some(dec!(1000)),
            currency: "PLN".into(),
            status: "open".into(),
            stage_id: Some(2),
            expected_close_date: None,
            invoice_type: Some("auto_payment".into()),
            lost_reason: None,
            cash_prepaid: None,
            person_id: None,
            org_id: None,
        });

        let (status, json) = post_webhook(&h.state, automation_payload(7)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["processed"], false);
        let tasks = h.crm.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].0, 7);
    }

    #[tokio::test]
    async fn unparsable_body_is_a_bad_request() {
        let h = harness();
        let (status, _) = post_webhook_raw(&h.state, b"not json".to_vec(), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn payload_without_a_deal_id_is_a_bad_request() {
        let h = harness();
        let (status, _) =
            post_webhook(&h.state, serde_json::json!({ "event": "updated.deal" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn configured_secret_rejects_unsigned_and_accepts_signed() {
        let mut config = Config::test_defaults();
        config.webhook_secret = Some("hook-secret".into());
        let h = harness_with_config(config);
        seed_payable_deal(&h, 7);
        let body = automation_payload(7).to_string().into_bytes();

        let (status, _) = post_webhook_raw(&h.state, body.clone(), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let sig = sign("hook-secret", &body);
        let (status, json) = post_webhook_raw(&h.state, body, Some(&sig)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["action"], "payment");
    }
}
