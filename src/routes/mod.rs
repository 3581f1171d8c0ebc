// ABOUTME: HTTP route assembly and shared server resources
// ABOUTME: Builds the axum router over the webhook and health endpoints
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface of the retell backend
//!
//! A deliberately small router: the payment webhook plus health probes.
//! Everything the handlers need is injected once through
//! [`ServerResources`] — no ambient globals.

use crate::config::ServerConfig;
use crate::conversations::ConversationStore;
use crate::cooldown::CooldownTracker;
use crate::crypto::TokenSigner;
use crate::database_plugins::factory::Database;
use crate::rate_limiting::RateLimiter;
use crate::subscription::SubscriptionService;
use crate::webhooks::WebhookProcessor;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Health and readiness probes
pub mod health;
/// Payment webhook endpoint
pub mod webhooks;

/// Shared state injected into request handlers
pub struct ServerResources {
    /// Entitlement store handle
    pub database: Database,
    /// Subscription / entitlement engine
    pub subscriptions: Arc<SubscriptionService<Database>>,
    /// Conversation-state persistence
    pub conversations: Arc<ConversationStore<Database>>,
    /// Payment webhook processor
    pub processor: Arc<WebhookProcessor<Database>>,
    /// Callback token signer
    pub signer: Arc<TokenSigner>,
    /// Per-user request limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Per-chat action cooldowns
    pub cooldowns: Arc<CooldownTracker>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
}

/// Request timeout for the whole router
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the application router
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(webhooks::routes(resources))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}
