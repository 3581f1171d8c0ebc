// ABOUTME: Payment provider REST client for creating and verifying payments
// ABOUTME: Implements PaymentVerifier against the provider's authoritative API

// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! Payment Provider API Client
//!
//! Creates hosted payment links and re-fetches payments by id for
//! verification. The client never trusts webhook-supplied metadata; the
//! webhook processor calls [`PaymentVerifier::verify_payment`] and acts only
//! on what the provider's API returns.
//!
//! Every created payment carries a fresh UUID idempotence key, and its
//! metadata embeds `user_id`, `tier` and `duration_days` — the three values
//! verification later extracts.

use super::PaymentVerifier;
use crate::config::environment::PaymentProviderConfig;
use crate::errors::{AppError, ErrorCode};
use crate::models::{Tier, VerifiedPayment};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Subscription plans offered for purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingPlan {
    ProMonthly,
    ProQuarterly,
    ProYearly,
}

impl PricingPlan {
    /// Tier the plan purchases
    #[must_use]
    pub const fn tier(&self) -> Tier {
        Tier::Pro
    }

    /// Subscription length in days
    #[must_use]
    pub const fn duration_days(&self) -> i64 {
        match self {
            Self::ProMonthly => 30,
            Self::ProQuarterly => 90,
            Self::ProYearly => 365,
        }
    }

    /// Price in USD
    #[must_use]
    pub const fn amount_usd(&self) -> f64 {
        match self {
            Self::ProMonthly => 2.99,
            Self::ProQuarterly => 7.99,
            Self::ProYearly => 29.99,
        }
    }

    /// Human-readable plan name for the payment description
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::ProMonthly => "Pro (1 month)",
            Self::ProQuarterly => "Pro (3 months)",
            Self::ProYearly => "Pro (1 year)",
        }
    }
}

/// Payment provider client configuration
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    /// Shop/account id at the provider
    pub shop_id: String,
    /// Provider API secret
    pub secret_key: String,
    /// Provider API base URL
    pub base_url: String,
    /// Where the hosted checkout returns the user afterwards
    pub return_url: String,
}

impl PaymentsConfig {
    /// Build from server configuration; `None` when credentials are absent
    #[must_use]
    pub fn from_provider(config: &PaymentProviderConfig, return_url: &str) -> Option<Self> {
        Some(Self {
            shop_id: config.shop_id.clone()?,
            secret_key: config.secret_key.clone()?,
            base_url: "https://api.yookassa.ru/v3".into(),
            return_url: return_url.into(),
        })
    }
}

/// A created hosted-checkout payment
#[derive(Debug, Clone, Serialize)]
pub struct PaymentLink {
    /// URL the user completes the payment at
    pub payment_url: String,
    /// Provider-assigned payment id
    pub payment_id: String,
    pub amount: f64,
    pub currency: String,
    /// When the checkout link stops working
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct AmountBody {
    value: String,
    currency: String,
}

#[derive(Debug, Serialize)]
struct ConfirmationRequest {
    #[serde(rename = "type")]
    kind: String,
    return_url: String,
}

#[derive(Debug, Serialize)]
struct CreatePaymentRequest {
    amount: AmountBody,
    confirmation: ConfirmationRequest,
    capture: bool,
    description: String,
    metadata: PaymentMetadata,
    expires_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PaymentMetadata {
    user_id: String,
    tier: String,
    duration_days: String,
}

#[derive(Debug, Deserialize)]
struct AmountResponse {
    value: String,
    #[allow(dead_code)]
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmationResponse {
    confirmation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: String,
    status: String,
    amount: AmountResponse,
    confirmation: Option<ConfirmationResponse>,
    metadata: Option<PaymentMetadata>,
}

/// Stand-in verifier for deployments without provider credentials.
/// Every verification fails, so webhooks are rejected instead of trusted.
pub struct DisabledPayments;

#[async_trait]
impl PaymentVerifier for DisabledPayments {
    async fn verify_payment(&self, payment_id: &str) -> Result<Option<VerifiedPayment>> {
        warn!(payment_id, "payment provider not configured, refusing verification");
        Ok(None)
    }
}

/// Payment provider REST client
pub struct PaymentsClient {
    config: PaymentsConfig,
    client: reqwest::Client,
}

impl PaymentsClient {
    /// Create a new client
    #[must_use]
    pub fn new(config: PaymentsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create a hosted payment link for a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the request or responds
    /// without a confirmation URL.
    pub async fn create_payment_link(
        &self,
        user_id: i64,
        plan: PricingPlan,
    ) -> Result<PaymentLink, AppError> {
        let idempotence_key = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + Duration::hours(1);

        let body = CreatePaymentRequest {
            amount: AmountBody {
                value: format!("{:.2}", plan.amount_usd()),
                currency: "USD".into(),
            },
            confirmation: ConfirmationRequest {
                kind: "redirect".into(),
                return_url: self.config.return_url.clone(),
            },
            capture: true,
            description: format!("{} subscription", plan.title()),
            metadata: PaymentMetadata {
                user_id: user_id.to_string(),
                tier: plan.tier().as_str().into(),
                duration_days: plan.duration_days().to_string(),
            },
            expires_at: expires_at.to_rfc3339(),
        };

        info!(user_id, plan = ?plan, "creating payment");

        let response = self
            .client
            .post(format!("{}/payments", self.config.base_url))
            .basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
            .header("Idempotence-Key", &idempotence_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                AppError::new(
                    ErrorCode::ExternalServiceUnavailable,
                    format!("payment provider unreachable: {err}"),
                )
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::new(
                ErrorCode::ExternalServiceError,
                format!("payment creation failed: {status}: {detail}"),
            ));
        }

        let payment: PaymentResponse = response.json().await.map_err(|err| {
            AppError::new(
                ErrorCode::SerializationError,
                format!("unparsable payment creation response: {err}"),
            )
        })?;

        let payment_url = payment
            .confirmation
            .and_then(|c| c.confirmation_url)
            .ok_or_else(|| {
                AppError::new(
                    ErrorCode::ExternalServiceError,
                    "payment response carried no confirmation URL",
                )
            })?;

        info!(user_id, payment_id = %payment.id, "payment created");

        Ok(PaymentLink {
            payment_url,
            payment_id: payment.id,
            amount: plan.amount_usd(),
            currency: "USD".into(),
            expires_at,
        })
    }

    /// Fetch a payment by id from the provider's API
    async fn find_payment(&self, payment_id: &str) -> Result<Option<PaymentResponse>> {
        let response = self
            .client
            .get(format!("{}/payments/{payment_id}", self.config.base_url))
            .basic_auth(&self.config.shop_id, Some(&self.config.secret_key))
            .send()
            .await
            .context("payment provider unreachable")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!("payment lookup failed: {}", response.status()));
        }

        let payment = response
            .json()
            .await
            .context("unparsable payment lookup response")?;
        Ok(Some(payment))
    }
}

#[async_trait]
impl PaymentVerifier for PaymentsClient {
    async fn verify_payment(&self, payment_id: &str) -> Result<Option<VerifiedPayment>> {
        let Some(payment) = self.find_payment(payment_id).await? else {
            warn!(payment_id, "payment not found at provider");
            return Ok(None);
        };

        if payment.status != "succeeded" {
            info!(payment_id, status = %payment.status, "payment not settled");
            return Ok(None);
        }

        let Some(metadata) = payment.metadata else {
            warn!(payment_id, "settled payment carries no metadata");
            return Ok(None);
        };

        let (Ok(user_id), Ok(tier), Ok(duration_days)) = (
            metadata.user_id.parse::<i64>(),
            metadata.tier.parse::<Tier>(),
            metadata.duration_days.parse::<i64>(),
        ) else {
            warn!(payment_id, "settled payment carries unusable metadata");
            return Ok(None);
        };

        let amount = payment.amount.value.parse::<f64>().unwrap_or(0.0);

        info!(payment_id, user_id, tier = tier.as_str(), "payment verified");

        Ok(Some(VerifiedPayment {
            payment_id: payment.id,
            user_id,
            tier,
            duration_days,
            amount,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_table_matches_product_copy() {
        assert_eq!(PricingPlan::ProMonthly.duration_days(), 30);
        assert_eq!(PricingPlan::ProQuarterly.duration_days(), 90);
        assert_eq!(PricingPlan::ProYearly.duration_days(), 365);
        assert!(PricingPlan::ProYearly.amount_usd() < 12.0 * PricingPlan::ProMonthly.amount_usd());
    }

    #[test]
    fn config_requires_both_credentials() {
        let partial = PaymentProviderConfig {
            shop_id: Some("shop".into()),
            secret_key: None,
        };
        assert!(PaymentsConfig::from_provider(&partial, "https://t.me/bot").is_none());
    }
}
