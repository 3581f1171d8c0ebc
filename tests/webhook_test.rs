// ABOUTME: Integration tests for the payment webhook processor
// ABOUTME: Covers idempotency, verification, event routing, and response codes
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::{Duration, Utc};
use common::{memory_database, RecordingNotifier, StaticMembership, StaticVerifier};
use retell_backend::database_plugins::{factory::Database, EntitlementStore};
use retell_backend::models::{Tier, VerifiedPayment};
use retell_backend::subscription::SubscriptionService;
use retell_backend::webhooks::{WebhookOutcome, WebhookProcessor};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

struct Harness {
    db: Database,
    processor: WebhookProcessor<Database>,
    verifier: Arc<StaticVerifier>,
    notifier: Arc<RecordingNotifier>,
}

async fn harness(payments: Vec<VerifiedPayment>) -> Harness {
    let db = memory_database().await;
    let notifier = Arc::new(RecordingNotifier::new());
    let verifier = Arc::new(StaticVerifier::new(payments));
    let subscriptions = Arc::new(SubscriptionService::new(
        db.clone(),
        Arc::new(StaticMembership::new(false)),
        notifier.clone(),
        None,
        "neutral",
    ));
    let processor = WebhookProcessor::new(
        db.clone(),
        subscriptions,
        verifier.clone(),
        notifier.clone(),
    );
    Harness {
        db,
        processor,
        verifier,
        notifier,
    }
}

fn pro_payment(payment_id: &str, user_id: i64) -> VerifiedPayment {
    VerifiedPayment {
        payment_id: payment_id.into(),
        user_id,
        tier: Tier::Pro,
        duration_days: 30,
        amount: 2.99,
    }
}

fn succeeded_event(payment_id: &str, user_id: i64) -> Value {
    json!({
        "type": "notification",
        "event": "payment.succeeded",
        "object": {
            "id": payment_id,
            "status": "succeeded",
            "amount": { "value": "2.99", "currency": "USD" },
            "metadata": {
                "user_id": user_id.to_string(),
                "tier": "pro",
                "duration_days": "30"
            }
        }
    })
}

#[tokio::test]
async fn settled_payment_activates_the_subscription() {
    let h = harness(vec![pro_payment("pay-1", 42)]).await;

    let outcome = h.processor.process(&succeeded_event("pay-1", 42)).await;
    assert_eq!(outcome, WebhookOutcome::Activated);
    assert_eq!(outcome.status_code(), 200);

    let sub = h.db.get_subscription(42).await.unwrap().unwrap();
    assert!(sub.is_active);
    assert_eq!(sub.tier, Tier::Pro);
    assert_eq!(sub.transaction_id.as_deref(), Some("pay-1"));
    let days_out = (sub.expires_at.unwrap() - Utc::now()).num_days();
    assert!((29..=30).contains(&days_out));

    assert_eq!(h.notifier.sent_count(), 1);
}

#[tokio::test]
async fn duplicate_delivery_is_acknowledged_without_reapplying() {
    let h = harness(vec![pro_payment("pay-2", 42)]).await;
    let event = succeeded_event("pay-2", 42);

    assert_eq!(h.processor.process(&event).await, WebhookOutcome::Activated);
    let first_expiry = h
        .db
        .get_subscription(42)
        .await
        .unwrap()
        .unwrap()
        .expires_at;

    // Provider retry: same payment id again
    let second = h.processor.process(&event).await;
    assert_eq!(second, WebhookOutcome::AlreadyProcessed);
    assert_eq!(second.status_code(), 200);

    // Exactly one verification, one notification, and an unchanged expiry
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.notifier.sent_count(), 1);
    let sub = h.db.get_subscription(42).await.unwrap().unwrap();
    assert_eq!(sub.expires_at, first_expiry);
}

#[tokio::test]
async fn unverifiable_payment_is_rejected_and_terminal() {
    let h = harness(Vec::new()).await;
    let event = succeeded_event("pay-forged", 666);

    let outcome = h.processor.process(&event).await;
    assert_eq!(outcome, WebhookOutcome::Rejected("Payment verification failed"));
    assert_eq!(outcome.status_code(), 400);
    assert!(h.db.get_subscription(666).await.unwrap().is_none());

    // The idempotency record already exists, so a retry of the same forged
    // payment short-circuits without another verification attempt
    let retry = h.processor.process(&event).await;
    assert_eq!(retry, WebhookOutcome::AlreadyProcessed);
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 1);
    assert!(h.db.get_subscription(666).await.unwrap().is_none());
}

#[tokio::test]
async fn canceled_payments_are_acknowledged_as_noops() {
    let h = harness(Vec::new()).await;
    let event = json!({
        "type": "notification",
        "event": "payment.canceled",
        "object": { "id": "pay-3" }
    });

    let outcome = h.processor.process(&event).await;
    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(outcome.status_code(), 200);
    assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_events_and_envelopes_are_ignored() {
    let h = harness(Vec::new()).await;

    let unknown_event = json!({
        "type": "notification",
        "event": "refund.succeeded",
        "object": { "id": "pay-4" }
    });
    assert_eq!(h.processor.process(&unknown_event).await, WebhookOutcome::Ignored);

    let wrong_envelope = json!({ "type": "ping" });
    assert_eq!(h.processor.process(&wrong_envelope).await, WebhookOutcome::Ignored);

    let empty = json!({});
    assert_eq!(h.processor.process(&empty).await, WebhookOutcome::Ignored);
}

#[tokio::test]
async fn missing_payment_id_is_a_client_error() {
    let h = harness(Vec::new()).await;
    let event = json!({
        "type": "notification",
        "event": "payment.succeeded",
        "object": { "status": "succeeded" }
    });

    let outcome = h.processor.process(&event).await;
    assert_eq!(outcome, WebhookOutcome::Rejected("Missing payment_id"));
    assert_eq!(outcome.status_code(), 400);
}

#[tokio::test]
async fn webhook_metadata_is_ignored_in_favor_of_verification() {
    // The webhook body claims user 1, but the provider's API says the
    // payment belongs to user 2: the verified answer wins
    let h = harness(vec![pro_payment("pay-5", 2)]).await;
    let event = succeeded_event("pay-5", 1);

    assert_eq!(h.processor.process(&event).await, WebhookOutcome::Activated);
    assert!(h.db.get_subscription(1).await.unwrap().is_none());
    assert!(h.db.get_subscription(2).await.unwrap().unwrap().is_active);
}

#[tokio::test]
async fn renewal_extends_an_existing_subscription() {
    let h = harness(vec![pro_payment("pay-6", 42), pro_payment("pay-7", 42)]).await;

    assert_eq!(
        h.processor.process(&succeeded_event("pay-6", 42)).await,
        WebhookOutcome::Activated
    );
    assert_eq!(
        h.processor.process(&succeeded_event("pay-7", 42)).await,
        WebhookOutcome::Activated
    );

    let sub = h.db.get_subscription(42).await.unwrap().unwrap();
    assert_eq!(sub.transaction_id.as_deref(), Some("pay-7"));
    assert_eq!(h.notifier.sent_count(), 2);
}

#[tokio::test]
async fn idempotency_record_stores_the_raw_payload() {
    let h = harness(vec![pro_payment("pay-8", 42)]).await;
    let event = succeeded_event("pay-8", 42);
    h.processor.process(&event).await;

    let record = h
        .db
        .get_processed_webhook("yookassa", "pay-8")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.payload, event);
    assert!(record.processed_at <= Utc::now() + Duration::seconds(1));
}
