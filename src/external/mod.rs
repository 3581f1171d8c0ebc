// ABOUTME: External API client modules (payment provider, chat transport)
// ABOUTME: Defines the collaborator traits the entitlement layer depends on

// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! External Collaborators
//!
//! The entitlement layer never trusts or drives the outside world directly;
//! it goes through three narrow seams defined here. Production
//! implementations live in [`payments`] and [`telegram`]; tests substitute
//! in-memory doubles.

use crate::models::VerifiedPayment;
use anyhow::Result;
use async_trait::async_trait;

pub mod payments;
pub mod telegram;

pub use payments::{DisabledPayments, PaymentLink, PaymentsClient, PaymentsConfig, PricingPlan};
pub use telegram::{TelegramClient, TelegramConfig};

/// Authoritative payment lookup. The webhook processor re-fetches every
/// payment by id instead of trusting the webhook body; `Ok(None)` means the
/// payment does not exist, is not settled, or carries unusable metadata —
/// all terminal for that payment id.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// Confirm a payment against the provider's API
    async fn verify_payment(&self, payment_id: &str) -> Result<Option<VerifiedPayment>>;
}

/// Best-effort user messaging. Failures are logged by callers and never
/// roll back the action that triggered the message.
#[async_trait]
pub trait UserNotifier: Send + Sync {
    /// Deliver a plain-text message to the user's private chat
    async fn send_message(&self, user_id: i64, text: &str) -> Result<()>;
}

/// Oracle for the group-membership bonus
#[async_trait]
pub trait GroupMembershipChecker: Send + Sync {
    /// Whether the user currently belongs to the group
    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool>;
}
