// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Database Management
//!
//! SQLite storage for the entitlement layer: subscription records, daily
//! usage counters, the group-membership cache, webhook idempotency records,
//! personality blocking flags, and conversation state.
//!
//! Timestamps are stored as RFC 3339 TEXT; calendar days as `YYYY-MM-DD`.
//! Counter increments use `ON CONFLICT .. DO UPDATE SET c = c + 1`, so they
//! are atomic at the storage layer. The processed-webhooks insert uses
//! `ON CONFLICT DO NOTHING` and reports rows-affected — that insert is the
//! exactly-once boundary for payment processing.

use crate::models::{
    FlowState, GroupMembership, Personality, PersonalityAction, PersonalityUsage,
    ProcessedWebhook, Subscription, Tier, UsageAction, UsageCounters,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

/// Column holding the daily counter for an action kind
const fn usage_column(action: UsageAction) -> &'static str {
    match action {
        UsageAction::MessageDm => "messages_count",
        UsageAction::SummaryDm => "summaries_dm_count",
        UsageAction::SummaryGroup => "summaries_count",
        UsageAction::Judge => "judge_count",
    }
}

/// Column holding the per-personality counter for an action kind
const fn personality_column(action: PersonalityAction) -> &'static str {
    match action {
        PersonalityAction::Summary => "summary_count",
        PersonalityAction::Chat => "chat_count",
        PersonalityAction::Judge => "judge_count",
    }
}

/// Database manager for entitlement storage
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or migration fails.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Ensure SQLite creates the database file if it doesn't exist
        let connection_options = if database_url.starts_with("sqlite:")
            && !database_url.contains(":memory:")
            && !database_url.contains("mode=")
        {
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_string()
        };

        // A :memory: database exists per connection; more than one pool
        // connection would see different empty databases
        let pool = if connection_options.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(&connection_options)
                .await
        } else {
            SqlitePool::connect(&connection_options).await
        }
        .context("failed to connect to SQLite database")?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id INTEGER PRIMARY KEY,
                tier TEXT NOT NULL DEFAULT 'free',
                is_active BOOLEAN NOT NULL DEFAULT 0,
                expires_at TEXT,
                payment_method TEXT NOT NULL DEFAULT 'manual',
                transaction_id TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_limits (
                user_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                messages_count INTEGER NOT NULL DEFAULT 0,
                summaries_dm_count INTEGER NOT NULL DEFAULT 0,
                summaries_count INTEGER NOT NULL DEFAULT 0,
                judge_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS personality_usage (
                user_id INTEGER NOT NULL,
                personality_name TEXT NOT NULL,
                date TEXT NOT NULL,
                summary_count INTEGER NOT NULL DEFAULT 0,
                chat_count INTEGER NOT NULL DEFAULT 0,
                judge_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, personality_name, date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS group_membership_cache (
                user_id INTEGER PRIMARY KEY,
                is_member BOOLEAN NOT NULL DEFAULT 0,
                checked_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_webhooks (
                provider TEXT NOT NULL,
                payment_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                PRIMARY KEY (provider, payment_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS personalities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                created_by_user_id INTEGER,
                is_custom BOOLEAN NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                is_blocked BOOLEAN NOT NULL DEFAULT 0,
                is_group_bonus BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_personalities_owner
             ON personalities(created_by_user_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_states (
                flow_name TEXT NOT NULL,
                conv_key TEXT NOT NULL,
                state INTEGER NOT NULL,
                data TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (flow_name, conv_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("SQLite migrations complete");
        Ok(())
    }

    // ================================
    // Subscriptions
    // ================================

    /// Get a user's subscription record
    pub async fn get_subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_subscription(&r)).transpose()
    }

    /// Create or replace a user's subscription as active
    pub async fn upsert_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        expires_at: Option<DateTime<Utc>>,
        payment_method: &str,
        transaction_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, tier, is_active, expires_at, payment_method, transaction_id, updated_at)
            VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
            ON CONFLICT (user_id) DO UPDATE SET
                tier = excluded.tier,
                is_active = 1,
                expires_at = excluded.expires_at,
                payment_method = excluded.payment_method,
                transaction_id = excluded.transaction_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(expires_at.map(|at| at.to_rfc3339()))
        .bind(payment_method)
        .bind(transaction_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(user_id, tier = tier.as_str(), "subscription upserted");
        Ok(())
    }

    /// Deactivate a subscription, clearing its expiry
    pub async fn deactivate_subscription(&self, user_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET tier = 'free', is_active = 0, expires_at = NULL, updated_at = ?2
            WHERE user_id = ?1
            "#,
        )
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(user_id, "subscription deactivated");
        Ok(())
    }

    // ================================
    // Usage counters
    // ================================

    /// Get usage counters for a user on a specific day
    pub async fn get_usage(&self, user_id: i64, day: NaiveDate) -> Result<Option<UsageCounters>> {
        let row = sqlx::query("SELECT * FROM usage_limits WHERE user_id = ?1 AND date = ?2")
            .bind(user_id)
            .bind(day.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_usage(&r)).transpose()
    }

    /// Increment today's counter for an action
    pub async fn increment_usage(&self, user_id: i64, action: UsageAction) -> Result<()> {
        let column = usage_column(action);
        let sql = format!(
            "INSERT INTO usage_limits (user_id, date, {column}) VALUES (?1, ?2, 1)
             ON CONFLICT (user_id, date) DO UPDATE SET {column} = {column} + 1"
        );
        sqlx::query(&sql)
            .bind(user_id)
            .bind(Utc::now().date_naive().to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get per-personality usage for a user on a specific day
    pub async fn get_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        day: NaiveDate,
    ) -> Result<Option<PersonalityUsage>> {
        let row = sqlx::query(
            "SELECT * FROM personality_usage
             WHERE user_id = ?1 AND personality_name = ?2 AND date = ?3",
        )
        .bind(user_id)
        .bind(personality)
        .bind(day.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_personality_usage(&r)).transpose()
    }

    /// Increment today's per-personality counter for an action
    pub async fn increment_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        action: PersonalityAction,
    ) -> Result<()> {
        let column = personality_column(action);
        let sql = format!(
            "INSERT INTO personality_usage (user_id, personality_name, date, {column})
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT (user_id, personality_name, date) DO UPDATE SET {column} = {column} + 1"
        );
        sqlx::query(&sql)
            .bind(user_id)
            .bind(personality)
            .bind(Utc::now().date_naive().to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ================================
    // Group membership cache
    // ================================

    /// Get the cached membership answer for a user
    pub async fn get_group_membership(&self, user_id: i64) -> Result<Option<GroupMembership>> {
        let row = sqlx::query("SELECT * FROM group_membership_cache WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> Result<GroupMembership> {
            let checked_at_str: String = r.try_get("checked_at")?;
            Ok(GroupMembership {
                user_id: r.try_get("user_id")?,
                is_member: r.try_get("is_member")?,
                checked_at: DateTime::parse_from_rfc3339(&checked_at_str)?.with_timezone(&Utc),
            })
        })
        .transpose()
    }

    /// Upsert the cached membership answer
    pub async fn update_group_membership(&self, user_id: i64, is_member: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_membership_cache (user_id, is_member, checked_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id) DO UPDATE SET
                is_member = excluded.is_member,
                checked_at = excluded.checked_at
            "#,
        )
        .bind(user_id)
        .bind(is_member)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ================================
    // Webhook idempotency
    // ================================

    /// Atomically record a webhook delivery; `true` means first sighting
    pub async fn record_webhook(
        &self,
        provider: &str,
        payment_id: &str,
        payload: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_webhooks (provider, payment_id, payload, processed_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (provider, payment_id) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(payment_id)
        .bind(payload.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fetch an idempotency record
    pub async fn get_processed_webhook(
        &self,
        provider: &str,
        payment_id: &str,
    ) -> Result<Option<ProcessedWebhook>> {
        let row = sqlx::query(
            "SELECT * FROM processed_webhooks WHERE provider = ?1 AND payment_id = ?2",
        )
        .bind(provider)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<ProcessedWebhook> {
            let payload_str: String = r.try_get("payload")?;
            let processed_at_str: String = r.try_get("processed_at")?;
            Ok(ProcessedWebhook {
                provider: r.try_get("provider")?,
                payment_id: r.try_get("payment_id")?,
                payload: serde_json::from_str(&payload_str)?,
                processed_at: DateTime::parse_from_rfc3339(&processed_at_str)?
                    .with_timezone(&Utc),
            })
        })
        .transpose()
    }

    // ================================
    // Personalities
    // ================================

    /// Insert a personality row, returning its id
    pub async fn create_personality(&self, personality: &Personality) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO personalities
                (name, created_by_user_id, is_custom, is_active, is_blocked, is_group_bonus, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&personality.name)
        .bind(personality.created_by_user_id)
        .bind(personality.is_custom)
        .bind(personality.is_active)
        .bind(personality.is_blocked)
        .bind(personality.is_group_bonus)
        .bind(personality.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Get a personality by id
    pub async fn get_personality(&self, id: i64) -> Result<Option<Personality>> {
        let row = sqlx::query("SELECT * FROM personalities WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_personality(&r)).transpose()
    }

    /// List a user's active custom personalities, oldest first
    pub async fn list_custom_personalities(&self, user_id: i64) -> Result<Vec<Personality>> {
        let rows = sqlx::query(
            "SELECT * FROM personalities
             WHERE created_by_user_id = ?1 AND is_custom = 1 AND is_active = 1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_personality).collect()
    }

    /// Count a user's active custom personalities
    pub async fn count_active_custom_personalities(&self, user_id: i64) -> Result<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM personalities
             WHERE created_by_user_id = ?1 AND is_custom = 1 AND is_active = 1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let n: i64 = row.try_get("n")?;
        Ok(u32::try_from(n).unwrap_or(0))
    }

    /// Block custom personalities beyond `limit`, keeping the oldest usable
    pub async fn block_excess_custom_personalities(&self, user_id: i64, limit: u32) -> Result<()> {
        let personalities = self.list_custom_personalities(user_id).await?;
        let limit = limit as usize;

        for (idx, personality) in personalities.iter().enumerate() {
            let blocked = idx >= limit;
            if personality.is_blocked != blocked {
                sqlx::query("UPDATE personalities SET is_blocked = ?2 WHERE id = ?1")
                    .bind(personality.id)
                    .bind(blocked)
                    .execute(&self.pool)
                    .await?;
            }
        }

        let blocked_count = personalities.len().saturating_sub(limit);
        if blocked_count > 0 {
            info!(user_id, blocked_count, "blocked excess custom personalities");
        }
        Ok(())
    }

    /// Block or unblock the group-bonus personalities
    pub async fn set_group_bonus_blocked(&self, user_id: i64, blocked: bool) -> Result<()> {
        sqlx::query(
            "UPDATE personalities SET is_blocked = ?2
             WHERE created_by_user_id = ?1 AND is_group_bonus = 1 AND is_active = 1",
        )
        .bind(user_id)
        .bind(blocked)
        .execute(&self.pool)
        .await?;

        info!(user_id, blocked, "group bonus personalities updated");
        Ok(())
    }

    // ================================
    // Conversation state
    // ================================

    /// Load all stored states for a flow
    pub async fn load_conversations(&self, flow: &str) -> Result<Vec<(String, FlowState)>> {
        let rows = sqlx::query(
            "SELECT conv_key, state, data FROM conversation_states WHERE flow_name = ?1",
        )
        .bind(flow)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<(String, FlowState)> {
                let key: String = r.try_get("conv_key")?;
                let state: i64 = r.try_get("state")?;
                let data_str: Option<String> = r.try_get("data")?;
                let data = data_str
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?;
                Ok((key, FlowState { state, data }))
            })
            .collect()
    }

    /// Upsert one participant's flow state; `None` deletes the entry
    pub async fn save_conversation(
        &self,
        flow: &str,
        key: &str,
        state: Option<&FlowState>,
    ) -> Result<()> {
        match state {
            Some(state) => {
                sqlx::query(
                    r#"
                    INSERT INTO conversation_states (flow_name, conv_key, state, data, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT (flow_name, conv_key) DO UPDATE SET
                        state = excluded.state,
                        data = excluded.data,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(flow)
                .bind(key)
                .bind(state.state)
                .bind(state.data.as_ref().map(ToString::to_string))
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM conversation_states WHERE flow_name = ?1 AND conv_key = ?2",
                )
                .bind(flow)
                .bind(key)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    /// Delete conversation rows not touched since `older_than`
    pub async fn sweep_conversations(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_states WHERE updated_at < ?1")
            .bind(older_than.to_rfc3339())
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            debug!(removed, "swept abandoned conversation states");
        }
        Ok(removed)
    }
}

fn row_to_subscription(row: &SqliteRow) -> Result<Subscription> {
    let tier_str: String = row.try_get("tier")?;
    let expires_at_str: Option<String> = row.try_get("expires_at")?;
    let updated_at_str: String = row.try_get("updated_at")?;

    Ok(Subscription {
        user_id: row.try_get("user_id")?,
        tier: tier_str.parse().unwrap_or_default(),
        is_active: row.try_get("is_active")?,
        expires_at: expires_at_str
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()?,
        payment_method: row.try_get("payment_method")?,
        transaction_id: row.try_get("transaction_id")?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at_str)?.with_timezone(&Utc),
    })
}

fn row_to_usage(row: &SqliteRow) -> Result<UsageCounters> {
    let date_str: String = row.try_get("date")?;
    Ok(UsageCounters {
        user_id: row.try_get("user_id")?,
        date: date_str.parse()?,
        messages_count: row.try_get::<i64, _>("messages_count")? as u32,
        summaries_dm_count: row.try_get::<i64, _>("summaries_dm_count")? as u32,
        summaries_count: row.try_get::<i64, _>("summaries_count")? as u32,
        judge_count: row.try_get::<i64, _>("judge_count")? as u32,
    })
}

fn row_to_personality_usage(row: &SqliteRow) -> Result<PersonalityUsage> {
    let date_str: String = row.try_get("date")?;
    Ok(PersonalityUsage {
        user_id: row.try_get("user_id")?,
        personality_name: row.try_get("personality_name")?,
        date: date_str.parse()?,
        summary_count: row.try_get::<i64, _>("summary_count")? as u32,
        chat_count: row.try_get::<i64, _>("chat_count")? as u32,
        judge_count: row.try_get::<i64, _>("judge_count")? as u32,
    })
}

fn row_to_personality(row: &SqliteRow) -> Result<Personality> {
    let created_at_str: String = row.try_get("created_at")?;
    Ok(Personality {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_by_user_id: row.try_get("created_by_user_id")?,
        is_custom: row.try_get("is_custom")?,
        is_active: row.try_get("is_active")?,
        is_blocked: row.try_get("is_blocked")?,
        is_group_bonus: row.try_get("is_group_bonus")?,
        created_at: DateTime::parse_from_rfc3339(&created_at_str)?.with_timezone(&Utc),
    })
}
