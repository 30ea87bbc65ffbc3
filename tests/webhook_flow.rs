//! End-to-end tests for webhook intake.
//!
//! These tests drive the full axum router against the in-memory adapters:
//! 1. Signature verification happens before any ledger write
//! 2. Duplicate and concurrent deliveries apply exactly once
//! 3. Out-of-order deliveries converge
//! 4. The ledger admin surface inspects and replays rows

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use futures::future::join_all;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use payment_event_engine::adapters::http::webhooks::WebhookResponse;
use payment_event_engine::adapters::http::{webhook_router, WebhookAppState};
use payment_event_engine::adapters::memory::{
    InMemoryBillingStore, InMemoryLedgerStore, RecordingActionDispatcher,
};
use payment_event_engine::config::{ServerConfig, WebhookConfig};
use payment_event_engine::domain::billing::{
    PaymentRecord, PaymentStatus, PaymentType, SubscriptionChanges, SubscriptionRecord,
};
use payment_event_engine::domain::webhooks::signature::signature_header;
use payment_event_engine::domain::webhooks::{EventStatus, SignatureVerifier, WebhookProcessor};
use payment_event_engine::ports::{BillingStore, DomainAction, LedgerStore};

const SECRET: &str = "whsec_flow_test_secret";
const ADMIN_TOKEN: &str = "admin-token-for-flow-tests";

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Harness {
    ledger: Arc<InMemoryLedgerStore>,
    billing: Arc<InMemoryBillingStore>,
    actions: Arc<RecordingActionDispatcher>,
    app: Router,
}

fn harness_with(webhook: WebhookConfig) -> Harness {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let billing = Arc::new(InMemoryBillingStore::new());
    let actions = Arc::new(RecordingActionDispatcher::new());

    let processor = WebhookProcessor::new(
        SignatureVerifier::new(webhook.signing_secret.clone(), webhook.tolerance_secs),
        ledger.clone(),
        billing.clone(),
        actions.clone(),
        webhook.processing_deadline(),
    );
    let state = WebhookAppState::new(processor, ledger.clone(), &ServerConfig::default(), &webhook)
        .expect("valid webhook config");

    Harness {
        ledger,
        billing,
        actions,
        app: webhook_router(state),
    }
}

fn webhook_config() -> WebhookConfig {
    WebhookConfig {
        signing_secret: SecretString::new(SECRET.to_string()),
        ..Default::default()
    }
}

fn harness() -> Harness {
    harness_with(webhook_config())
}

fn admin_harness() -> Harness {
    harness_with(WebhookConfig {
        admin_token: Some(SecretString::new(ADMIN_TOKEN.to_string())),
        ..webhook_config()
    })
}

fn event(id: &str, event_type: &str, object: Value) -> String {
    json!({
        "id": id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": { "object": object },
        "livemode": false
    })
    .to_string()
}

fn payment_event(id: &str, event_type: &str, payment_id: &str) -> String {
    event(
        id,
        event_type,
        json!({ "id": payment_id, "amount": 2000, "currency": "usd" }),
    )
}

fn signed(body: &str) -> String {
    signature_header(SECRET, Utc::now().timestamp(), body.as_bytes())
}

fn webhook_request(body: &str, signature: Option<String>) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        request = request.header("Stripe-Signature", signature);
    }
    request.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn deliver(app: &Router, body: &str) -> (StatusCode, WebhookResponse) {
    let (status, json) = send(app, webhook_request(body, Some(signed(body)))).await;
    (status, serde_json::from_value(json).unwrap())
}

fn admin_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {}", ADMIN_TOKEN))
        .body(Body::empty())
        .unwrap()
}

fn admin_post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", ADMIN_TOKEN))
        .body(Body::empty())
        .unwrap()
}

async fn pending_payment(h: &Harness, payment_id: &str) {
    h.billing
        .insert_payment(PaymentRecord::pending(
            payment_id,
            "user_1",
            2000,
            "usd",
            PaymentType::OneTime,
        ))
        .await;
}

async fn payment_status(h: &Harness, payment_id: &str) -> PaymentStatus {
    h.billing
        .find_payment(payment_id)
        .await
        .unwrap()
        .unwrap()
        .status
}

// =============================================================================
// Idempotency
// =============================================================================

#[tokio::test]
async fn concurrent_duplicate_delivery_grants_credits_once() {
    let h = harness();
    pending_payment(&h, "pay_001").await;
    let body = payment_event("evt_001", "payment.succeeded", "pay_001");

    let results = join_all((0..2).map(|_| deliver(&h.app, &body))).await;

    let mut statuses: Vec<&str> = results
        .iter()
        .map(|(code, response)| {
            assert_eq!(*code, StatusCode::OK);
            assert_eq!(response.event_id.as_deref(), Some("evt_001"));
            response.status.as_str()
        })
        .collect();
    statuses.sort_unstable();
    assert_eq!(statuses, vec!["duplicate", "processed"]);

    assert_eq!(h.ledger.len().await, 1);
    let row = h.ledger.find("evt_001").await.unwrap().unwrap();
    assert_eq!(row.status, EventStatus::Succeeded);

    let requests = h.actions.requests().await;
    assert_eq!(requests.len(), 1);
    assert!(matches!(
        &requests[0].action,
        DomainAction::GrantCredits { payment_id, amount: 2000, .. } if payment_id == "pay_001"
    ));
    assert_eq!(payment_status(&h, "pay_001").await, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn many_concurrent_deliveries_apply_once() {
    let h = harness();
    pending_payment(&h, "pay_burst").await;
    let body = payment_event("evt_burst", "payment.succeeded", "pay_burst");

    let results = join_all((0..8).map(|_| deliver(&h.app, &body))).await;

    assert!(results.iter().all(|(code, _)| *code == StatusCode::OK));
    let processed = results
        .iter()
        .filter(|(_, r)| r.status == "processed")
        .count();
    assert_eq!(processed, 1);
    assert_eq!(h.ledger.len().await, 1);
    assert_eq!(h.actions.requests().await.len(), 1);
}

#[tokio::test]
async fn sequential_redelivery_is_acknowledged_as_duplicate() {
    let h = harness();
    pending_payment(&h, "pay_seq").await;
    let body = payment_event("evt_seq", "payment.succeeded", "pay_seq");

    let (_, first) = deliver(&h.app, &body).await;
    let (code, second) = deliver(&h.app, &body).await;
    let (_, third) = deliver(&h.app, &body).await;

    assert_eq!(first.status, "processed");
    assert_eq!(code, StatusCode::OK);
    assert_eq!(second.status, "duplicate");
    assert_eq!(third.status, "duplicate");
    assert_eq!(h.actions.requests().await.len(), 1);
}

// =============================================================================
// Signature verification
// =============================================================================

#[tokio::test]
async fn invalid_signature_is_rejected_without_ledger_row() {
    let h = harness();
    let body = payment_event("evt_forged", "payment.succeeded", "pay_1");
    let forged = signature_header("whsec_wrong", Utc::now().timestamp(), body.as_bytes());

    let (status, json) = send(&h.app, webhook_request(&body, Some(forged))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "rejected");
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn expired_signature_is_rejected_without_ledger_row() {
    let h = harness();
    let body = payment_event("evt_old", "payment.succeeded", "pay_1");
    let stale = signature_header(SECRET, Utc::now().timestamp() - 301, body.as_bytes());

    let (status, _) = send(&h.app, webhook_request(&body, Some(stale))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn missing_signature_is_rejected_without_ledger_row() {
    let h = harness();
    let body = payment_event("evt_unsigned", "payment.succeeded", "pay_1");

    let (status, _) = send(&h.app, webhook_request(&body, None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let h = harness();
    let body = payment_event("evt_tamper", "payment.succeeded", "pay_1");
    let signature = signed(&body);
    let tampered = body.replace("2000", "9000");

    let (status, _) = send(&h.app, webhook_request(&tampered, Some(signature))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn signed_garbage_body_is_rejected() {
    let h = harness();
    let body = "this is not an event";

    let (status, json) = send(&h.app, webhook_request(body, Some(signed(body)))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["event_id"], Value::Null);
    assert!(h.ledger.is_empty().await);
}

// =============================================================================
// Ordering and convergence
// =============================================================================

#[tokio::test]
async fn payment_before_its_record_fails_then_succeeds_on_redelivery() {
    let h = harness();
    let body = payment_event("evt_early", "payment.succeeded", "pay_late");

    let (status, response) = deliver(&h.app, &body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.status, "failed");
    let row = h.ledger.find("evt_early").await.unwrap().unwrap();
    assert_eq!(row.status, EventStatus::Failed);
    assert!(h.actions.requests().await.is_empty());

    pending_payment(&h, "pay_late").await;

    let (status, response) = deliver(&h.app, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.status, "processed");
    let row = h.ledger.find("evt_early").await.unwrap().unwrap();
    assert_eq!(row.status, EventStatus::Succeeded);
    assert_eq!(row.attempts, 2);
    assert_eq!(row.error_message, None);
    assert_eq!(payment_status(&h, "pay_late").await, PaymentStatus::Succeeded);
}

#[tokio::test]
async fn payment_status_never_regresses() {
    let h = harness();
    pending_payment(&h, "pay_mono").await;

    let (_, failed) = deliver(
        &h.app,
        &payment_event("evt_fail", "payment.failed", "pay_mono"),
    )
    .await;
    let (status, late_success) = deliver(
        &h.app,
        &payment_event("evt_success", "payment.succeeded", "pay_mono"),
    )
    .await;

    assert_eq!(failed.status, "processed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(late_success.status, "ignored");
    assert_eq!(payment_status(&h, "pay_mono").await, PaymentStatus::Failed);
    let grants = h
        .actions
        .requests()
        .await
        .into_iter()
        .filter(|r| matches!(r.action, DomainAction::GrantCredits { .. }))
        .count();
    assert_eq!(grants, 0);
}

#[tokio::test]
async fn older_subscription_update_does_not_overwrite_newer() {
    let h = harness();
    h.billing
        .put_subscription(SubscriptionRecord::activated(
            "sub_lww",
            "user_1",
            &SubscriptionChanges {
                plan: Some("starter".to_string()),
                source_version: Some(1),
                ..Default::default()
            },
        ))
        .await;

    let v2 = event(
        "evt_v2",
        "subscription.updated",
        json!({ "id": "sub_lww", "status": "active", "plan": "pro", "version": 2 }),
    );
    let v1 = event(
        "evt_v1",
        "subscription.updated",
        json!({ "id": "sub_lww", "status": "active", "plan": "basic", "version": 1 }),
    );

    let (_, first) = deliver(&h.app, &v2).await;
    let (status, second) = deliver(&h.app, &v1).await;

    assert_eq!(first.status, "processed");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second.status, "ignored");

    let stored = h.billing.find_subscription("sub_lww").await.unwrap().unwrap();
    assert_eq!(stored.plan.as_deref(), Some("pro"));
    assert_eq!(stored.source_version, Some(2));
}

#[tokio::test]
async fn unrecognized_event_type_is_acknowledged() {
    let h = harness();
    let body = event("evt_other", "customer.tax_id.created", json!({ "id": "txi_1" }));

    let (status, response) = deliver(&h.app, &body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.status, "ignored");
    let row = h.ledger.find("evt_other").await.unwrap().unwrap();
    assert_eq!(row.status, EventStatus::Succeeded);
    assert!(row.note.unwrap().contains("customer.tax_id.created"));
}

// =============================================================================
// HTTP surface
// =============================================================================

#[tokio::test]
async fn unknown_provider_is_not_found() {
    let h = harness();
    let body = payment_event("evt_pp", "payment.succeeded", "pay_1");
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/paypal")
        .header("Stripe-Signature", signed(&body))
        .body(Body::from(body))
        .unwrap();

    let (status, _) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let h = harness_with(WebhookConfig {
        max_body_bytes: 1024,
        ..webhook_config()
    });
    let body = event("evt_big", "payment.succeeded", json!({ "pad": "x".repeat(4096) }));
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("content-length", body.len())
        .header("Stripe-Signature", signed(&body))
        .body(Body::from(body))
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn health_is_ok() {
    let h = harness();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, json) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn request_id_and_client_ip_are_recorded() {
    let h = harness();
    pending_payment(&h, "pay_prov").await;
    let body = payment_event("evt_prov", "payment.succeeded", "pay_prov");
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/stripe")
        .header("Stripe-Signature", signed(&body))
        .header("x-forwarded-for", "198.51.100.4, 10.0.0.2")
        .header("x-request-id", "req-flow-42")
        .body(Body::from(body))
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-flow-42"
    );
    let row = h.ledger.find("evt_prov").await.unwrap().unwrap();
    assert_eq!(row.request_id.as_deref(), Some("req-flow-42"));
    assert_eq!(row.client_ip.as_deref(), Some("198.51.100.4"));
}

#[tokio::test]
async fn generated_request_id_is_stored() {
    let h = harness();
    let body = event("evt_genid", "customer.created", json!({ "id": "cus_1" }));

    let response = h
        .app
        .clone()
        .oneshot(webhook_request(&body, Some(signed(&body))))
        .await
        .unwrap();

    let header = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    assert!(header.is_some());
    let row = h.ledger.find("evt_genid").await.unwrap().unwrap();
    assert_eq!(row.request_id, header);
}

// =============================================================================
// Ledger admin
// =============================================================================

#[tokio::test]
async fn admin_routes_absent_without_token() {
    let h = harness();

    let (status, _) = send(&h.app, admin_get("/admin/webhooks")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_bearer_token() {
    let h = admin_harness();
    let request = Request::builder()
        .uri("/admin/webhooks")
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_lists_and_inspects_rows() {
    let h = admin_harness();
    let body = payment_event("evt_list", "payment.succeeded", "pay_missing");
    deliver(&h.app, &body).await;
    deliver(&h.app, &event("evt_ok", "customer.created", json!({ "id": "cus_1" }))).await;

    let (status, json) = send(&h.app, admin_get("/admin/webhooks?status=failed")).await;
    assert_eq!(status, StatusCode::OK);
    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event_id"], "evt_list");
    assert!(events[0].get("raw_payload").is_none());

    let (status, json) = send(&h.app, admin_get("/admin/webhooks/evt_list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "failed");
    assert_eq!(json["raw_payload"], body);

    let (status, json) = send(&h.app, admin_get("/admin/webhooks/evt_nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error_code"], "EVENT_NOT_FOUND");
}

#[tokio::test]
async fn admin_rejects_unknown_status_filter() {
    let h = admin_harness();

    let (status, _) = send(&h.app, admin_get("/admin/webhooks?status=exploded")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_replay_reprocesses_failed_event() {
    let h = admin_harness();
    let body = payment_event("evt_replay", "payment.succeeded", "pay_replay");
    let (status, _) = deliver(&h.app, &body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    pending_payment(&h, "pay_replay").await;

    let (status, json) = send(&h.app, admin_post("/admin/webhooks/evt_replay/replay")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "processed");
    assert_eq!(payment_status(&h, "pay_replay").await, PaymentStatus::Succeeded);

    let (status, json) = send(&h.app, admin_post("/admin/webhooks/evt_replay/replay")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error_code"], "EVENT_NOT_REPLAYABLE");

    let (status, _) = send(&h.app, admin_post("/admin/webhooks/evt_ghost/replay")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
