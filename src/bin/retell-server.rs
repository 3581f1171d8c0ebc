// ABOUTME: Server binary wiring configuration, storage, and the webhook router
// ABOUTME: Production entry point for the retell backend
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Retell Backend Server Binary
//!
//! Starts the webhook HTTP server with the entitlement engine, throttles,
//! and token signer wired into shared state.

use anyhow::{Context, Result};
use clap::Parser;
use retell_backend::{
    config::ServerConfig,
    conversations::ConversationStore,
    cooldown::CooldownTracker,
    crypto::TokenSigner,
    database_plugins::{factory::Database, EntitlementStore},
    external::{
        DisabledPayments, GroupMembershipChecker, PaymentVerifier, PaymentsClient,
        PaymentsConfig, TelegramClient, TelegramConfig, UserNotifier,
    },
    logging,
    rate_limiting::RateLimiter,
    routes::{self, ServerResources},
    subscription::SubscriptionService,
    webhooks::WebhookProcessor,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "retell-server")]
#[command(about = "Retell bot backend - entitlements, payment webhooks, signed tokens")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    logging::init_from_env()?;

    info!("Starting retell backend");
    info!("{}", config.summary());

    let database = Database::new(&config.database_url).await?;
    info!("Database ready: {}", database.backend_info());

    let bot_token = config
        .bot_token
        .clone()
        .context("BOT_TOKEN must be set")?;
    let telegram = Arc::new(TelegramClient::new(TelegramConfig::new(bot_token)));

    let return_url = config
        .bot_username
        .as_deref()
        .map_or_else(|| "https://t.me".into(), |name| format!("https://t.me/{name}"));
    let verifier: Arc<dyn PaymentVerifier> =
        match PaymentsConfig::from_provider(&config.payments, &return_url) {
            Some(payments_config) => Arc::new(PaymentsClient::new(payments_config)),
            None => {
                warn!("payment provider credentials missing, webhook verification disabled");
                Arc::new(DisabledPayments)
            }
        };

    let membership: Arc<dyn GroupMembershipChecker> = telegram.clone();
    let notifier: Arc<dyn UserNotifier> = telegram.clone();

    let subscriptions = Arc::new(SubscriptionService::new(
        database.clone(),
        membership,
        notifier.clone(),
        config.project_group_id,
        config.default_personality.clone(),
    ));

    let processor = Arc::new(WebhookProcessor::new(
        database.clone(),
        Arc::clone(&subscriptions),
        verifier,
        notifier,
    ));

    let resources = Arc::new(ServerResources {
        subscriptions,
        conversations: Arc::new(ConversationStore::new(database.clone())),
        processor,
        signer: Arc::new(TokenSigner::new(&config.signing_secret)),
        rate_limiter: Arc::new(RateLimiter::from_config(&config.throttle)),
        cooldowns: Arc::new(CooldownTracker::from_config(&config.throttle)),
        database,
        config: Arc::new(config.clone()),
    });

    let app = routes::router(resources);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;

    info!("Listening on 0.0.0.0:{}", config.http_port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to install shutdown handler: {err}");
        return;
    }
    info!("shutdown signal received");
}
