//! SQLite database implementation
//!
//! This module wraps the SQLite database functionality in
//! [`crate::database`] to implement the `EntitlementStore` trait.

use super::EntitlementStore;
use crate::models::{
    FlowState, GroupMembership, Personality, PersonalityAction, PersonalityUsage,
    ProcessedWebhook, Subscription, Tier, UsageAction, UsageCounters,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

/// SQLite database implementation
#[derive(Clone)]
pub struct SqliteDatabase {
    /// The underlying database instance
    inner: crate::database::Database,
}

impl SqliteDatabase {
    /// Get a reference to the inner database
    #[must_use]
    pub const fn inner(&self) -> &crate::database::Database {
        &self.inner
    }
}

#[async_trait]
impl EntitlementStore for SqliteDatabase {
    async fn new(database_url: &str) -> Result<Self> {
        let inner = crate::database::Database::new(database_url).await?;
        Ok(Self { inner })
    }

    async fn migrate(&self) -> Result<()> {
        self.inner.migrate().await
    }

    async fn get_subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        self.inner.get_subscription(user_id).await
    }

    async fn upsert_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        expires_at: Option<DateTime<Utc>>,
        payment_method: &str,
        transaction_id: Option<&str>,
    ) -> Result<()> {
        self.inner
            .upsert_subscription(user_id, tier, expires_at, payment_method, transaction_id)
            .await
    }

    async fn deactivate_subscription(&self, user_id: i64) -> Result<()> {
        self.inner.deactivate_subscription(user_id).await
    }

    async fn get_usage(&self, user_id: i64, day: NaiveDate) -> Result<Option<UsageCounters>> {
        self.inner.get_usage(user_id, day).await
    }

    async fn increment_usage(&self, user_id: i64, action: UsageAction) -> Result<()> {
        self.inner.increment_usage(user_id, action).await
    }

    async fn get_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        day: NaiveDate,
    ) -> Result<Option<PersonalityUsage>> {
        self.inner
            .get_personality_usage(user_id, personality, day)
            .await
    }

    async fn increment_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        action: PersonalityAction,
    ) -> Result<()> {
        self.inner
            .increment_personality_usage(user_id, personality, action)
            .await
    }

    async fn get_group_membership(&self, user_id: i64) -> Result<Option<GroupMembership>> {
        self.inner.get_group_membership(user_id).await
    }

    async fn update_group_membership(&self, user_id: i64, is_member: bool) -> Result<()> {
        self.inner.update_group_membership(user_id, is_member).await
    }

    async fn record_webhook(
        &self,
        provider: &str,
        payment_id: &str,
        payload: &Value,
    ) -> Result<bool> {
        self.inner.record_webhook(provider, payment_id, payload).await
    }

    async fn get_processed_webhook(
        &self,
        provider: &str,
        payment_id: &str,
    ) -> Result<Option<ProcessedWebhook>> {
        self.inner.get_processed_webhook(provider, payment_id).await
    }

    async fn create_personality(&self, personality: &Personality) -> Result<i64> {
        self.inner.create_personality(personality).await
    }

    async fn get_personality(&self, id: i64) -> Result<Option<Personality>> {
        self.inner.get_personality(id).await
    }

    async fn list_custom_personalities(&self, user_id: i64) -> Result<Vec<Personality>> {
        self.inner.list_custom_personalities(user_id).await
    }

    async fn count_active_custom_personalities(&self, user_id: i64) -> Result<u32> {
        self.inner.count_active_custom_personalities(user_id).await
    }

    async fn block_excess_custom_personalities(&self, user_id: i64, limit: u32) -> Result<()> {
        self.inner
            .block_excess_custom_personalities(user_id, limit)
            .await
    }

    async fn set_group_bonus_blocked(&self, user_id: i64, blocked: bool) -> Result<()> {
        self.inner.set_group_bonus_blocked(user_id, blocked).await
    }

    async fn load_conversations(&self, flow: &str) -> Result<Vec<(String, FlowState)>> {
        self.inner.load_conversations(flow).await
    }

    async fn save_conversation(
        &self,
        flow: &str,
        key: &str,
        state: Option<&FlowState>,
    ) -> Result<()> {
        self.inner.save_conversation(flow, key, state).await
    }

    async fn sweep_conversations(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.inner.sweep_conversations(older_than).await
    }
}
