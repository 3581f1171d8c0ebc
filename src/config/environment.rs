// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables, runtime configuration, and secret validation
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Environment-based configuration management for production deployment

use crate::constants::{defaults, env_config, limits};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Strongly typed log level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to `tracing::Level`
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }

    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

/// Environment type, controlling how strictly configuration is enforced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Throttling settings consumed by the rate limiter and cooldown tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Requests allowed per user per window
    pub rate_limit_requests: u32,
    /// Sliding window size in seconds
    pub rate_limit_window_secs: u64,
    /// Per-chat action cooldown in seconds
    pub cooldown_secs: u64,
}

impl ThrottleConfig {
    /// Sliding window size as a `Duration`
    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    /// Cooldown as a `Duration`
    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Payment provider credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProviderConfig {
    /// Shop/account id at the provider
    pub shop_id: Option<String>,
    /// API secret for the provider
    pub secret_key: Option<String>,
}

impl PaymentProviderConfig {
    /// Whether both credentials are present
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.shop_id.is_some() && self.secret_key.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API port
    pub http_port: u16,
    /// Log level
    pub log_level: LogLevel,
    /// Deployment environment
    pub environment: Environment,
    /// Database URL (SQLite path or PostgreSQL connection string)
    pub database_url: String,
    /// HMAC signing secret for callback tokens
    pub signing_secret: String,
    /// Chat transport bot token
    pub bot_token: Option<String>,
    /// Bot username, used to build the post-payment return URL
    pub bot_username: Option<String>,
    /// Payment provider credentials
    pub payments: PaymentProviderConfig,
    /// Project group granting the bonus personality slot
    pub project_group_id: Option<i64>,
    /// Throttle settings
    pub throttle: ThrottleConfig,
    /// Default personality name, always usable on every tier
    pub default_personality: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if `SECRET_KEY` is missing, or if it fails the
    /// strength checks while running in production.
    pub fn from_env() -> Result<Self> {
        let environment = Environment::from_str_or_default(
            &env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        );

        let signing_secret = env::var("SECRET_KEY").context("SECRET_KEY must be set")?;
        validate_signing_secret(&signing_secret, environment)?;

        Ok(Self {
            http_port: env_config::http_port(),
            log_level: LogLevel::from_str_or_default(
                &env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            ),
            environment,
            database_url: env_config::database_url(),
            signing_secret,
            bot_token: env::var("BOT_TOKEN").ok(),
            bot_username: env::var("BOT_USERNAME").ok(),
            payments: PaymentProviderConfig {
                shop_id: env::var("PAYMENT_SHOP_ID").ok(),
                secret_key: env::var("PAYMENT_SECRET_KEY").ok(),
            },
            project_group_id: env_config::project_group_id(),
            throttle: ThrottleConfig {
                rate_limit_requests: env_config::rate_limit_requests(),
                rate_limit_window_secs: env_config::rate_limit_window_secs(),
                cooldown_secs: env_config::cooldown_secs(),
            },
            default_personality: env::var("DEFAULT_PERSONALITY")
                .unwrap_or_else(|_| defaults::NEUTRAL_PERSONALITY.into()),
        })
    }

    /// One-line startup summary for the log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "http_port={} environment={} database={} group_bonus={} rate_limit={}/{}s cooldown={}s",
            self.http_port,
            self.environment,
            redact_database_url(&self.database_url),
            self.project_group_id.is_some(),
            self.throttle.rate_limit_requests,
            self.throttle.rate_limit_window_secs,
            self.throttle.cooldown_secs,
        )
    }
}

/// Reject secrets that are too short or known-weak.
///
/// In production a bad secret is fatal; elsewhere it is logged so local
/// development with throwaway values keeps working.
fn validate_signing_secret(secret: &str, environment: Environment) -> Result<()> {
    let problem = if secret.len() < limits::SECRET_MIN_LENGTH {
        Some(format!(
            "SECRET_KEY must be at least {} characters, got {}",
            limits::SECRET_MIN_LENGTH,
            secret.len()
        ))
    } else if limits::WEAK_SECRETS
        .iter()
        .any(|weak| secret.eq_ignore_ascii_case(weak))
    {
        Some("SECRET_KEY is a known default/weak value".into())
    } else {
        None
    };

    match problem {
        Some(msg) if environment.is_production() => bail!(msg),
        Some(msg) => {
            warn!("{msg} (tolerated outside production)");
            Ok(())
        }
        None => Ok(()),
    }
}

/// Strip credentials from a connection string before logging it
fn redact_database_url(url: &str) -> String {
    if let Some(at) = url.rfind('@') {
        if let Some(scheme_end) = url.find("://") {
            return format!("{}://***{}", &url[..scheme_end], &url[at..]);
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_secret_is_fatal_in_production() {
        let err = validate_signing_secret("too-short", Environment::Production);
        assert!(err.is_err());
    }

    #[test]
    fn weak_secret_is_fatal_in_production() {
        let err = validate_signing_secret(
            "default_secret_CHANGE_ME_in_production",
            Environment::Production,
        );
        assert!(err.is_err());
    }

    #[test]
    fn weak_secret_is_tolerated_in_development() {
        assert!(validate_signing_secret("secret", Environment::Development).is_ok());
    }

    #[test]
    fn strong_secret_passes_everywhere() {
        let secret = "d41d8cd98f00b204e9800998ecf8427e-extra-entropy";
        assert!(validate_signing_secret(secret, Environment::Production).is_ok());
        assert!(validate_signing_secret(secret, Environment::Development).is_ok());
    }

    #[test]
    fn database_url_redaction_hides_credentials() {
        let redacted = redact_database_url("postgresql://user:pw@db.host/retell");
        assert!(!redacted.contains("pw"));
        assert!(redacted.contains("@db.host/retell"));
    }
}
