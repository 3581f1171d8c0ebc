// ABOUTME: Main library entry point for the retell bot backend
// ABOUTME: Provides the entitlement, throttling, and payment webhook subsystems
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![deny(unsafe_code)]

//! # Retell Backend
//!
//! Backend for a chat-summary bot. The bot's message handling and AI
//! generation live elsewhere; this crate is the entitlement and trust
//! layer those handlers call into:
//!
//! - **Subscriptions**: free/pro tiers with daily quotas, lazy expiry
//!   downgrade, and a group-membership bonus slot
//! - **Payment webhooks**: at-least-once provider notifications applied
//!   exactly once via an atomic idempotency gate
//! - **Signed tokens**: HMAC-authenticated callback data that survives
//!   stateless invocations
//! - **Throttling**: per-user rate limiting and per-chat cooldowns
//! - **Conversation state**: durable multi-step flow state for processes
//!   with no shared memory
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use retell_backend::config::ServerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("retell backend configured: {}", config.summary());
//!     Ok(())
//! }
//! ```

/// Configuration management and startup validation
pub mod config;

/// Application constants and tier quota tables
pub mod constants;

/// Conversation-state persistence for multi-step flows
pub mod conversations;

/// Per-chat action cooldown tracking
pub mod cooldown;

/// Callback token signing and verification
pub mod crypto;

/// SQLite storage implementation
pub mod database;

/// Database abstraction layer with plugin support
pub mod database_plugins;

/// Unified error handling with standard error codes and HTTP responses
pub mod errors;

/// External collaborator traits and API clients
pub mod external;

/// Logging configuration and setup
pub mod logging;

/// Core data models
pub mod models;

/// Per-user request rate limiting
pub mod rate_limiting;

/// HTTP routes and shared server resources
pub mod routes;

/// Subscription / entitlement engine
pub mod subscription;

/// Payment webhook processing
pub mod webhooks;
