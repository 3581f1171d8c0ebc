// ABOUTME: Payment webhook processor turning at-least-once deliveries into exactly-once mutations
// ABOUTME: Validates, deduplicates, verifies, and applies payment notifications
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Payment Webhook Processor
//!
//! One delivery walks this state machine:
//!
//! ```text
//! received -> (duplicate? -> ignored)
//!          -> (payment verified? -> failed)
//!          -> entitlement applied
//!          -> notification attempted (best-effort)
//!          -> acknowledged
//! ```
//!
//! The idempotency gate runs *before* verification: an atomic
//! insert-if-absent on (provider, payment id) is the sole exactly-once
//! guarantee under at-least-once delivery. A payment that then fails
//! verification is terminal for that payment id — the record already
//! exists, so retries short-circuit to "already processed".
//!
//! The webhook body is never trusted: the payment is re-fetched from the
//! provider's authoritative API by id before any state changes.

use crate::database_plugins::EntitlementStore;
use crate::external::{PaymentVerifier, UserNotifier};
use crate::subscription::SubscriptionService;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Payment provider name used as the idempotency namespace
const PROVIDER: &str = "yookassa";

/// Terminal classification of one webhook delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// First sighting of a settled payment; subscription was activated
    Activated,
    /// Duplicate delivery; acknowledged without reapplying anything
    AlreadyProcessed,
    /// Non-notification envelope, unknown event, or `payment.canceled`
    Ignored,
    /// Malformed or unverifiable; the caller should answer 400
    Rejected(&'static str),
    /// Entitlement mutation failed; the caller should answer 500
    Failed(&'static str),
}

impl WebhookOutcome {
    /// HTTP status for the response
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Activated | Self::AlreadyProcessed | Self::Ignored => 200,
            Self::Rejected(_) => 400,
            Self::Failed(_) => 500,
        }
    }

    /// JSON body for the response
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::Activated => json!({ "status": "ok", "subscription_activated": true }),
            Self::AlreadyProcessed => json!({ "status": "ok", "message": "Already processed" }),
            Self::Ignored => json!({ "status": "ok" }),
            Self::Rejected(msg) | Self::Failed(msg) => json!({ "error": msg }),
        }
    }
}

/// Payment webhook processor
pub struct WebhookProcessor<S: EntitlementStore> {
    store: S,
    subscriptions: Arc<SubscriptionService<S>>,
    verifier: Arc<dyn PaymentVerifier>,
    notifier: Arc<dyn UserNotifier>,
}

impl<S: EntitlementStore> WebhookProcessor<S> {
    /// Create a processor over the store, engine, and collaborators
    pub fn new(
        store: S,
        subscriptions: Arc<SubscriptionService<S>>,
        verifier: Arc<dyn PaymentVerifier>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        Self {
            store,
            subscriptions,
            verifier,
            notifier,
        }
    }

    /// Process one webhook delivery
    pub async fn process(&self, event: &Value) -> WebhookOutcome {
        if event.get("type").and_then(Value::as_str) != Some("notification") {
            warn!(
                kind = ?event.get("type"),
                "unknown webhook envelope type, ignoring"
            );
            return WebhookOutcome::Ignored;
        }

        let event_name = event.get("event").and_then(Value::as_str).unwrap_or("");
        info!(event = event_name, "payment webhook received");

        match event_name {
            "payment.succeeded" => self.handle_payment_succeeded(event).await,
            "payment.canceled" => {
                let payment_id = event
                    .pointer("/object/id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                info!(payment_id, "payment canceled");
                WebhookOutcome::Ignored
            }
            other => {
                info!(event = other, "ignoring event");
                WebhookOutcome::Ignored
            }
        }
    }

    async fn handle_payment_succeeded(&self, event: &Value) -> WebhookOutcome {
        let Some(payment_id) = event.pointer("/object/id").and_then(Value::as_str) else {
            error!("webhook carries no payment id");
            return WebhookOutcome::Rejected("Missing payment_id");
        };

        // Idempotency gate: the atomic insert decides whether this delivery
        // is the first. Everything after this point runs at most once per
        // payment id.
        match self.store.record_webhook(PROVIDER, payment_id, event).await {
            Ok(true) => {}
            Ok(false) => {
                info!(payment_id, "skipping duplicate payment webhook");
                return WebhookOutcome::AlreadyProcessed;
            }
            Err(err) => {
                error!(payment_id, "idempotency gate failed: {err:#}");
                return WebhookOutcome::Failed("Internal server error");
            }
        }

        // Independent verification against the provider API
        let payment = match self.verifier.verify_payment(payment_id).await {
            Ok(Some(payment)) => payment,
            Ok(None) => {
                error!(payment_id, "payment verification failed");
                return WebhookOutcome::Rejected("Payment verification failed");
            }
            Err(err) => {
                error!(payment_id, "payment verification errored: {err:#}");
                return WebhookOutcome::Rejected("Payment verification failed");
            }
        };

        info!(
            payment_id,
            user_id = payment.user_id,
            tier = payment.tier.as_str(),
            amount = payment.amount,
            "processing payment"
        );

        if let Err(err) = self
            .subscriptions
            .create_or_update_subscription(
                payment.user_id,
                payment.tier,
                payment.duration_days,
                PROVIDER,
                Some(payment_id),
            )
            .await
        {
            error!(payment_id, user_id = payment.user_id, "subscription activation failed: {err:#}");
            return WebhookOutcome::Failed("Subscription activation failed");
        }

        info!(
            payment_id,
            user_id = payment.user_id,
            tier = payment.tier.as_str(),
            "subscription activated"
        );

        // Best-effort side channel; never turns a processed payment into a
        // failure
        self.notify_activation(&payment).await;

        WebhookOutcome::Activated
    }

    async fn notify_activation(&self, payment: &crate::models::VerifiedPayment) {
        let expires_at = Utc::now() + Duration::days(payment.duration_days);
        let text = format!(
            "Payment received!\n\n\
             Amount: ${:.2}\n\
             Duration: {} days\n\
             Expires: {}\n\n\
             Your {} subscription is active.\n\
             Check your status with /mystatus",
            payment.amount,
            payment.duration_days,
            expires_at.format("%Y-%m-%d"),
            payment.tier.as_str().to_uppercase(),
        );

        match self.notifier.send_message(payment.user_id, &text).await {
            Ok(()) => info!(user_id = payment.user_id, "activation notice sent"),
            Err(err) => warn!(
                user_id = payment.user_id,
                "failed to notify user about activation: {err:#}"
            ),
        }
    }
}
