// ABOUTME: System-wide constants and configuration values for the retell backend
// ABOUTME: Contains tier quota tables, throttle defaults, and env-based configuration
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Constants Module
//!
//! Application constants and environment variable configuration. The tier
//! quota tables live here; everything a deployment may want to tune is read
//! through `env_config` with a sane default.

use std::env;

/// Server identity constants
pub mod server {
    /// Server version from Cargo.toml
    pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Service name used in structured log output
    pub const SERVICE_NAME: &str = "retell-backend";
}

/// Default values used when no environment override is present
pub mod defaults {
    /// Default HTTP port for the webhook server
    pub const DEFAULT_HTTP_PORT: u16 = 8081;

    /// Default SQLite database location
    pub const DEFAULT_DATABASE_URL: &str = "sqlite:./data/retell.db";

    /// The personality every tier may always use
    pub const NEUTRAL_PERSONALITY: &str = "neutral";

    /// Requests allowed per rate-limit window
    pub const RATE_LIMIT_REQUESTS: u32 = 10;

    /// Rate-limit window size in seconds
    pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

    /// Cooldown between repeated chat actions in seconds
    pub const COOLDOWN_SECS: u64 = 60;
}

/// Hard limits and security thresholds
pub mod limits {
    /// Minimum accepted signing secret length
    pub const SECRET_MIN_LENGTH: usize = 32;

    /// Known default or weak secrets that must never reach production
    pub const WEAK_SECRETS: &[&str] = &[
        "default_secret_CHANGE_ME_in_production",
        "secret",
        "changeme",
        "change_me",
        "password",
        "test",
        "00000000000000000000000000000000",
    ];

    /// Group membership cache entries older than this are re-checked
    pub const GROUP_MEMBERSHIP_TTL_SECS: i64 = 3600;

    /// Conversation-state rows older than this are swept on write
    pub const CONVERSATION_MAX_AGE_HOURS: i64 = 24;

    /// Truncated HMAC digest length in hex characters
    pub const SIGNATURE_LENGTH: usize = 16;
}

/// Environment-based configuration accessors
pub mod env_config {
    use super::env;

    /// Get HTTP server port from environment or default
    #[must_use]
    pub fn http_port() -> u16 {
        env::var("HTTP_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(super::defaults::DEFAULT_HTTP_PORT)
    }

    /// Get database URL from environment or default
    #[must_use]
    pub fn database_url() -> String {
        env::var("DATABASE_URL").unwrap_or_else(|_| super::defaults::DEFAULT_DATABASE_URL.into())
    }

    /// Requests allowed per user per rate-limit window
    #[must_use]
    pub fn rate_limit_requests() -> u32 {
        env::var("RATE_LIMIT_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(super::defaults::RATE_LIMIT_REQUESTS)
    }

    /// Rate-limit window in seconds
    #[must_use]
    pub fn rate_limit_window_secs() -> u64 {
        env::var("RATE_LIMIT_WINDOW")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(super::defaults::RATE_LIMIT_WINDOW_SECS)
    }

    /// Per-chat action cooldown in seconds
    #[must_use]
    pub fn cooldown_secs() -> u64 {
        env::var("COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(super::defaults::COOLDOWN_SECS)
    }

    /// Chat id of the project group granting the bonus personality slot
    #[must_use]
    pub fn project_group_id() -> Option<i64> {
        env::var("PROJECT_GROUP_ID").ok().and_then(|v| v.parse().ok())
    }
}

/// Daily quota tables per subscription tier
pub mod tiers {
    use crate::models::{Tier, UsageAction};

    /// Daily quotas for one tier. `None` means unlimited; `Some(0)` means the
    /// action is never allowed on this tier.
    #[derive(Debug, Clone, Copy)]
    pub struct TierQuotas {
        pub messages_dm: Option<u32>,
        pub summaries_dm: Option<u32>,
        pub summaries_group: Option<u32>,
        pub judge: Option<u32>,
        /// Per-personality per-action daily cap (free tier only)
        pub personality_daily: Option<u32>,
        /// Custom personality slots before the group bonus
        pub custom_personalities: u32,
    }

    impl TierQuotas {
        /// Quota for a single action kind
        #[must_use]
        pub const fn for_action(&self, action: UsageAction) -> Option<u32> {
            match action {
                UsageAction::MessageDm => self.messages_dm,
                UsageAction::SummaryDm => self.summaries_dm,
                UsageAction::SummaryGroup => self.summaries_group,
                UsageAction::Judge => self.judge,
            }
        }
    }

    const FREE_QUOTAS: TierQuotas = TierQuotas {
        messages_dm: Some(100),
        summaries_dm: Some(3),
        summaries_group: Some(3),
        judge: Some(2),
        personality_daily: Some(5),
        custom_personalities: 0,
    };

    const PRO_QUOTAS: TierQuotas = TierQuotas {
        messages_dm: Some(500),
        summaries_dm: Some(10),
        summaries_group: Some(20),
        judge: Some(20),
        personality_daily: None,
        custom_personalities: 3,
    };

    /// Look up the quota table for a tier
    #[must_use]
    pub const fn quotas(tier: Tier) -> TierQuotas {
        match tier {
            Tier::Free => FREE_QUOTAS,
            Tier::Pro => PRO_QUOTAS,
        }
    }

    /// Custom personality slots for a tier and group membership combination
    #[must_use]
    pub const fn custom_personality_limit(tier: Tier, in_group: bool) -> u32 {
        let base = quotas(tier).custom_personalities;
        if in_group {
            base + 1
        } else {
            base
        }
    }
}
