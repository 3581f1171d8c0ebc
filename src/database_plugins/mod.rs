// ABOUTME: Database abstraction layer for the retell backend
// ABOUTME: Plugin architecture with SQLite and PostgreSQL backends

use crate::models::{
    FlowState, GroupMembership, Personality, PersonalityAction, PersonalityUsage,
    ProcessedWebhook, Subscription, Tier, UsageAction, UsageCounters,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

pub mod factory;
pub mod sqlite;

#[cfg(feature = "postgresql")]
pub mod postgres;

/// Core entitlement storage abstraction.
///
/// The store is the only durable shared resource and the sole source of
/// truth across processes. All database implementations must provide this
/// interface to the service layer.
#[async_trait]
pub trait EntitlementStore: Send + Sync + Clone {
    /// Create a new database connection
    async fn new(database_url: &str) -> Result<Self>
    where
        Self: Sized;

    /// Run database migrations to set up the schema
    async fn migrate(&self) -> Result<()>;

    // ================================
    // Subscriptions
    // ================================

    /// Get a user's subscription record, if any
    async fn get_subscription(&self, user_id: i64) -> Result<Option<Subscription>>;

    /// Create or replace a user's subscription as active with the given
    /// expiry. A user has at most one subscription row.
    async fn upsert_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        expires_at: Option<DateTime<Utc>>,
        payment_method: &str,
        transaction_id: Option<&str>,
    ) -> Result<()>;

    /// Deactivate a subscription (downgrade). The row is kept for audit;
    /// repeated calls are no-ops.
    async fn deactivate_subscription(&self, user_id: i64) -> Result<()>;

    // ================================
    // Usage counters
    // ================================

    /// Get a user's usage counters for one UTC calendar day
    async fn get_usage(&self, user_id: i64, day: NaiveDate) -> Result<Option<UsageCounters>>;

    /// Atomically increment today's counter for an action
    async fn increment_usage(&self, user_id: i64, action: UsageAction) -> Result<()>;

    /// Get a user's per-personality counters for one day
    async fn get_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        day: NaiveDate,
    ) -> Result<Option<PersonalityUsage>>;

    /// Atomically increment today's per-personality counter for an action
    async fn increment_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        action: PersonalityAction,
    ) -> Result<()>;

    // ================================
    // Group membership cache
    // ================================

    /// Get the cached membership answer for a user
    async fn get_group_membership(&self, user_id: i64) -> Result<Option<GroupMembership>>;

    /// Upsert the cached membership answer, stamping it with the current time
    async fn update_group_membership(&self, user_id: i64, is_member: bool) -> Result<()>;

    // ================================
    // Webhook idempotency
    // ================================

    /// Atomically record a webhook delivery. Returns `true` if this is the
    /// first time the (provider, payment id) pair was seen, `false` if the
    /// event is a duplicate. The insert is the exactly-once atomicity
    /// boundary for payment processing.
    async fn record_webhook(&self, provider: &str, payment_id: &str, payload: &Value)
        -> Result<bool>;

    /// Fetch an idempotency record, if present
    async fn get_processed_webhook(
        &self,
        provider: &str,
        payment_id: &str,
    ) -> Result<Option<ProcessedWebhook>>;

    // ================================
    // Personalities (entitlement-relevant operations only)
    // ================================

    /// Insert a personality row, returning its id
    async fn create_personality(&self, personality: &Personality) -> Result<i64>;

    /// Get a personality by id
    async fn get_personality(&self, id: i64) -> Result<Option<Personality>>;

    /// List a user's active custom personalities, oldest first
    async fn list_custom_personalities(&self, user_id: i64) -> Result<Vec<Personality>>;

    /// Count a user's active custom personalities (blocked rows still
    /// occupy a slot)
    async fn count_active_custom_personalities(&self, user_id: i64) -> Result<u32>;

    /// Soft-block custom personalities beyond `limit`, keeping the oldest
    /// ones usable, and unblock everything within the limit
    async fn block_excess_custom_personalities(&self, user_id: i64, limit: u32) -> Result<()>;

    /// Block or unblock the personalities granted by the group bonus
    async fn set_group_bonus_blocked(&self, user_id: i64, blocked: bool) -> Result<()>;

    // ================================
    // Conversation state
    // ================================

    /// Load all stored states for a flow as raw `(composite_key, state)`
    /// pairs; the caller parses keys and decides what to skip
    async fn load_conversations(&self, flow: &str) -> Result<Vec<(String, FlowState)>>;

    /// Upsert one participant's flow state; `None` deletes the entry
    async fn save_conversation(
        &self,
        flow: &str,
        key: &str,
        state: Option<&FlowState>,
    ) -> Result<()>;

    /// Delete conversation rows not touched since `older_than`, returning
    /// how many were removed
    async fn sweep_conversations(&self, older_than: DateTime<Utc>) -> Result<u64>;
}
