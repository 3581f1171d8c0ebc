// ABOUTME: Chat transport client implementing user notification and membership checks
// ABOUTME: Thin Bot API wrapper used as the UserNotifier and GroupMembershipChecker

// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! Chat Transport API Client
//!
//! The backend touches the chat transport in exactly two places: sending a
//! private message (payment confirmations, bonus block/unblock notices) and
//! asking whether a user belongs to the project group. Both are Bot API
//! calls; everything else about message delivery lives outside this crate.

use super::{GroupMembershipChecker, UserNotifier};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Chat transport client configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token
    pub bot_token: String,
    /// API base URL (overridable for tests)
    pub base_url: String,
}

impl TelegramConfig {
    /// Standard configuration for a bot token
    #[must_use]
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            base_url: "https://api.telegram.org".into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<Value>,
    description: Option<String>,
}

/// Membership statuses that count as "in the group"
const MEMBER_STATUSES: &[&str] = &["member", "administrator", "creator"];

/// Bot API client
pub struct TelegramClient {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramClient {
    /// Create a new client
    #[must_use]
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.base_url, self.config.bot_token
        )
    }

    async fn call(&self, method: &str, body: &impl Serialize) -> Result<Value> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("chat transport unreachable for {method}"))?;

        let api: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("unparsable {method} response"))?;

        if !api.ok {
            return Err(anyhow!(
                "{method} failed: {}",
                api.description.unwrap_or_else(|| "no description".into())
            ));
        }
        Ok(api.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl UserNotifier for TelegramClient {
    async fn send_message(&self, user_id: i64, text: &str) -> Result<()> {
        self.call(
            "sendMessage",
            &SendMessageRequest {
                chat_id: user_id,
                text,
            },
        )
        .await?;
        debug!(user_id, "message delivered");
        Ok(())
    }
}

#[async_trait]
impl GroupMembershipChecker for TelegramClient {
    async fn is_member(&self, group_id: i64, user_id: i64) -> Result<bool> {
        let result = self
            .call(
                "getChatMember",
                &serde_json::json!({ "chat_id": group_id, "user_id": user_id }),
            )
            .await?;

        let status = result
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("getChatMember response carried no status"))?;

        Ok(MEMBER_STATUSES.contains(&status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_statuses_cover_the_privileged_roles() {
        assert!(MEMBER_STATUSES.contains(&"member"));
        assert!(MEMBER_STATUSES.contains(&"administrator"));
        assert!(MEMBER_STATUSES.contains(&"creator"));
        assert!(!MEMBER_STATUSES.contains(&"left"));
        assert!(!MEMBER_STATUSES.contains(&"kicked"));
    }
}
