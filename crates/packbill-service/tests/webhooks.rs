//! Gateway webhook integration tests.

mod common;

use axum::body::Bytes;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, StatusCode};
use axum_test::TestResponse;
use common::{test_config, webhook_signature, TestHarness};
use packbill_core::{Payment, PaymentStatus, PlanType, SubscriptionStatus};
use packbill_store::{PaymentKey, Store};
use serde_json::{json, Value};

const SIGNATURE: HeaderName = HeaderName::from_static("x-signature");

async fn create_order(harness: &TestHarness, plan: &str) -> String {
    let response = harness
        .server
        .post("/payment/create-order")
        .add_header(AUTHORIZATION, harness.user_auth_header())
        .json(&json!({ "plan_type": plan }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    body["order_id"].as_str().unwrap().to_string()
}

async fn deliver(harness: &TestHarness, event: &Value) -> TestResponse {
    let body = serde_json::to_vec(event).unwrap();
    harness
        .server
        .post("/payment/webhook")
        .add_header(SIGNATURE, webhook_signature(&body))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await
}

fn payment_event(event: &str, payment_id: &str, order_id: &str) -> Value {
    json!({
        "event": event,
        "payload": {
            "payment": {
                "entity": {
                    "id": payment_id,
                    "order_id": order_id,
                    "method": "upi",
                    "error_description": "Bank declined",
                }
            }
        }
    })
}

fn ledger(harness: &TestHarness, order_id: &str) -> Payment {
    harness
        .store
        .get_payment(&PaymentKey::Order(order_id.into()))
        .unwrap()
        .unwrap()
}

// ============================================================================
// Signature
// ============================================================================

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "pro").await;
    let body = serde_json::to_vec(&payment_event("payment.captured", "pay_1", &order_id)).unwrap();

    let response = harness
        .server
        .post("/payment/webhook")
        .add_header(SIGNATURE, webhook_signature(b"something else"))
        .content_type("application/json")
        .bytes(Bytes::from(body))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(ledger(&harness, &order_id).status, PaymentStatus::Created);
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/payment/webhook")
        .json(&json!({ "event": "payment.captured" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_without_configured_secret_fails_closed() {
    let harness = TestHarness::with_config(packbill_service::ServiceConfig {
        gateway_webhook_secret: None,
        ..test_config()
    });

    let response = deliver(&harness, &json!({ "event": "payment.captured" })).await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn captured_marks_payment_succeeded() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "pro").await;

    let response = deliver(&harness, &payment_event("payment.captured", "pay_cap", &order_id)).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["received"], true);

    let payment = ledger(&harness, &order_id);
    assert_eq!(payment.status, PaymentStatus::Success);
    assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_cap"));
    assert_eq!(payment.method.as_deref(), Some("upi"));
    assert!(payment.paid_at.is_some());

    // Activation stays with verify unless capture activation is enabled.
    assert!(payment.subscription_id.is_none());
    assert!(harness.subscription().is_none());
}

#[tokio::test]
async fn replayed_capture_leaves_ledger_identical() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "pro").await;
    let event = payment_event("payment.captured", "pay_twice", &order_id);

    deliver(&harness, &event).await.assert_status_ok();
    let first = ledger(&harness, &order_id);

    deliver(&harness, &event).await.assert_status_ok();
    assert_eq!(ledger(&harness, &order_id), first);
}

#[tokio::test]
async fn late_authorized_after_capture_is_ignored() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "pro").await;

    deliver(&harness, &payment_event("payment.captured", "pay_late", &order_id))
        .await
        .assert_status_ok();
    deliver(&harness, &payment_event("payment.authorized", "pay_late", &order_id))
        .await
        .assert_status_ok();

    assert_eq!(ledger(&harness, &order_id).status, PaymentStatus::Success);
}

#[tokio::test]
async fn failed_event_records_reason() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "pro").await;

    deliver(&harness, &payment_event("payment.failed", "pay_fail", &order_id))
        .await
        .assert_status_ok();

    let payment = ledger(&harness, &order_id);
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.error_message.as_deref(), Some("Bank declined"));
}

#[tokio::test]
async fn refund_processed_marks_payment_refunded() {
    let harness = TestHarness::new();
    let order_id = create_order(&harness, "pro").await;
    deliver(&harness, &payment_event("payment.captured", "pay_ref", &order_id))
        .await
        .assert_status_ok();

    let event = json!({
        "event": "refund.processed",
        "payload": {
            "refund": { "entity": { "id": "rfnd_9", "payment_id": "pay_ref" } }
        }
    });
    deliver(&harness, &event).await.assert_status_ok();

    let payment = ledger(&harness, &order_id);
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refund_id.as_deref(), Some("rfnd_9"));
}

#[tokio::test]
async fn events_for_unknown_payments_are_acknowledged() {
    let harness = TestHarness::new();

    let response = deliver(
        &harness,
        &payment_event("payment.captured", "pay_nobody", "order_nobody"),
    )
    .await;
    response.assert_status_ok();

    let response = deliver(&harness, &json!({ "event": "order.paid", "payload": {} })).await;
    response.assert_status_ok();
}

// ============================================================================
// Capture activation
// ============================================================================

#[tokio::test]
async fn capture_activates_when_enabled() {
    let harness = TestHarness::with_config(packbill_service::ServiceConfig {
        activate_on_capture: true,
        ..test_config()
    });
    let order_id = create_order(&harness, "pro").await;
    let event = payment_event("payment.captured", "pay_auto", &order_id);

    deliver(&harness, &event).await.assert_status_ok();
    let sub = harness.subscription().unwrap();
    assert_eq!(sub.plan, PlanType::Pro);
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(ledger(&harness, &order_id).subscription_id, Some(sub.id));

    // A replay and a late verify must not apply the purchase a second time.
    deliver(&harness, &event).await.assert_status_ok();
    assert_eq!(harness.subscription().unwrap(), sub);

    let response = harness
        .server
        .post("/payment/verify-payment")
        .add_header(AUTHORIZATION, harness.user_auth_header())
        .json(&json!({
            "order_id": order_id,
            "payment_id": "pay_auto",
            "signature": common::checkout_signature(&order_id, "pay_auto"),
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["message"], "Payment already verified");
    assert_eq!(body["immediate"], true);
    assert_eq!(harness.subscription().unwrap(), sub);
}
