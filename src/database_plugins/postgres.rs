//! PostgreSQL database implementation
//!
//! This module provides PostgreSQL support for cloud deployments,
//! implementing the same interface as the SQLite version.

use super::EntitlementStore;
use crate::models::{
    FlowState, GroupMembership, Personality, PersonalityAction, PersonalityUsage,
    ProcessedWebhook, Subscription, Tier, UsageAction, UsageCounters,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, info};

const fn usage_column(action: UsageAction) -> &'static str {
    match action {
        UsageAction::MessageDm => "messages_count",
        UsageAction::SummaryDm => "summaries_dm_count",
        UsageAction::SummaryGroup => "summaries_count",
        UsageAction::Judge => "judge_count",
    }
}

const fn personality_column(action: PersonalityAction) -> &'static str {
    match action {
        PersonalityAction::Summary => "summary_count",
        PersonalityAction::Chat => "chat_count",
        PersonalityAction::Judge => "judge_count",
    }
}

/// PostgreSQL database implementation
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

#[async_trait]
impl EntitlementStore for PostgresDatabase {
    async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("failed to connect to PostgreSQL database")?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                user_id BIGINT PRIMARY KEY,
                tier TEXT NOT NULL DEFAULT 'free',
                is_active BOOLEAN NOT NULL DEFAULT FALSE,
                expires_at TIMESTAMPTZ,
                payment_method TEXT NOT NULL DEFAULT 'manual',
                transaction_id TEXT,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_limits (
                user_id BIGINT NOT NULL,
                date DATE NOT NULL,
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
                user_id BIGINT NOT NULL,
                personality_name TEXT NOT NULL,
                date DATE NOT NULL,
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
                user_id BIGINT PRIMARY KEY,
                is_member BOOLEAN NOT NULL DEFAULT FALSE,
                checked_at TIMESTAMPTZ NOT NULL
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
                processed_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (provider, payment_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS personalities (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                created_by_user_id BIGINT,
                is_custom BOOLEAN NOT NULL DEFAULT FALSE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
                is_group_bonus BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL
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
                state BIGINT NOT NULL,
                data TEXT,
                updated_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (flow_name, conv_key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("PostgreSQL migrations complete");
        Ok(())
    }

    async fn get_subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_subscription(&r)).transpose()
    }

    async fn upsert_subscription(
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
            VALUES ($1, $2, TRUE, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                tier = EXCLUDED.tier,
                is_active = TRUE,
                expires_at = EXCLUDED.expires_at,
                payment_method = EXCLUDED.payment_method,
                transaction_id = EXCLUDED.transaction_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(expires_at)
        .bind(payment_method)
        .bind(transaction_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        debug!(user_id, tier = tier.as_str(), "subscription upserted");
        Ok(())
    }

    async fn deactivate_subscription(&self, user_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET tier = 'free', is_active = FALSE, expires_at = NULL, updated_at = $2
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(user_id, "subscription deactivated");
        Ok(())
    }

    async fn get_usage(&self, user_id: i64, day: NaiveDate) -> Result<Option<UsageCounters>> {
        let row = sqlx::query("SELECT * FROM usage_limits WHERE user_id = $1 AND date = $2")
            .bind(user_id)
            .bind(day)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_usage(&r)).transpose()
    }

    async fn increment_usage(&self, user_id: i64, action: UsageAction) -> Result<()> {
        let column = usage_column(action);
        let sql = format!(
            "INSERT INTO usage_limits (user_id, date, {column}) VALUES ($1, $2, 1)
             ON CONFLICT (user_id, date) DO UPDATE SET {column} = usage_limits.{column} + 1"
        );
        sqlx::query(&sql)
            .bind(user_id)
            .bind(Utc::now().date_naive())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        day: NaiveDate,
    ) -> Result<Option<PersonalityUsage>> {
        let row = sqlx::query(
            "SELECT * FROM personality_usage
             WHERE user_id = $1 AND personality_name = $2 AND date = $3",
        )
        .bind(user_id)
        .bind(personality)
        .bind(day)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_personality_usage(&r)).transpose()
    }

    async fn increment_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        action: PersonalityAction,
    ) -> Result<()> {
        let column = personality_column(action);
        let sql = format!(
            "INSERT INTO personality_usage (user_id, personality_name, date, {column})
             VALUES ($1, $2, $3, 1)
             ON CONFLICT (user_id, personality_name, date)
             DO UPDATE SET {column} = personality_usage.{column} + 1"
        );
        sqlx::query(&sql)
            .bind(user_id)
            .bind(personality)
            .bind(Utc::now().date_naive())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_group_membership(&self, user_id: i64) -> Result<Option<GroupMembership>> {
        let row = sqlx::query("SELECT * FROM group_membership_cache WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> Result<GroupMembership> {
            Ok(GroupMembership {
                user_id: r.try_get("user_id")?,
                is_member: r.try_get("is_member")?,
                checked_at: r.try_get("checked_at")?,
            })
        })
        .transpose()
    }

    async fn update_group_membership(&self, user_id: i64, is_member: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_membership_cache (user_id, is_member, checked_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                is_member = EXCLUDED.is_member,
                checked_at = EXCLUDED.checked_at
            "#,
        )
        .bind(user_id)
        .bind(is_member)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_webhook(
        &self,
        provider: &str,
        payment_id: &str,
        payload: &Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_webhooks (provider, payment_id, payload, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, payment_id) DO NOTHING
            "#,
        )
        .bind(provider)
        .bind(payment_id)
        .bind(payload.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_processed_webhook(
        &self,
        provider: &str,
        payment_id: &str,
    ) -> Result<Option<ProcessedWebhook>> {
        let row = sqlx::query(
            "SELECT * FROM processed_webhooks WHERE provider = $1 AND payment_id = $2",
        )
        .bind(provider)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<ProcessedWebhook> {
            let payload_str: String = r.try_get("payload")?;
            Ok(ProcessedWebhook {
                provider: r.try_get("provider")?,
                payment_id: r.try_get("payment_id")?,
                payload: serde_json::from_str(&payload_str)?,
                processed_at: r.try_get("processed_at")?,
            })
        })
        .transpose()
    }

    async fn create_personality(&self, personality: &Personality) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO personalities
                (name, created_by_user_id, is_custom, is_active, is_blocked, is_group_bonus, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&personality.name)
        .bind(personality.created_by_user_id)
        .bind(personality.is_custom)
        .bind(personality.is_active)
        .bind(personality.is_blocked)
        .bind(personality.is_group_bonus)
        .bind(personality.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn get_personality(&self, id: i64) -> Result<Option<Personality>> {
        let row = sqlx::query("SELECT * FROM personalities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_personality(&r)).transpose()
    }

    async fn list_custom_personalities(&self, user_id: i64) -> Result<Vec<Personality>> {
        let rows = sqlx::query(
            "SELECT * FROM personalities
             WHERE created_by_user_id = $1 AND is_custom AND is_active
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_personality).collect()
    }

    async fn count_active_custom_personalities(&self, user_id: i64) -> Result<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM personalities
             WHERE created_by_user_id = $1 AND is_custom AND is_active",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let n: i64 = row.try_get("n")?;
        Ok(u32::try_from(n).unwrap_or(0))
    }

    async fn block_excess_custom_personalities(&self, user_id: i64, limit: u32) -> Result<()> {
        let personalities = self.list_custom_personalities(user_id).await?;
        let limit = limit as usize;

        for (idx, personality) in personalities.iter().enumerate() {
            let blocked = idx >= limit;
            if personality.is_blocked != blocked {
                sqlx::query("UPDATE personalities SET is_blocked = $2 WHERE id = $1")
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

    async fn set_group_bonus_blocked(&self, user_id: i64, blocked: bool) -> Result<()> {
        sqlx::query(
            "UPDATE personalities SET is_blocked = $2
             WHERE created_by_user_id = $1 AND is_group_bonus AND is_active",
        )
        .bind(user_id)
        .bind(blocked)
        .execute(&self.pool)
        .await?;

        info!(user_id, blocked, "group bonus personalities updated");
        Ok(())
    }

    async fn load_conversations(&self, flow: &str) -> Result<Vec<(String, FlowState)>> {
        let rows = sqlx::query(
            "SELECT conv_key, state, data FROM conversation_states WHERE flow_name = $1",
        )
        .bind(flow)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<(String, FlowState)> {
                let key: String = r.try_get("conv_key")?;
                let state: i64 = r.try_get("state")?;
                let data_str: Option<String> = r.try_get("data")?;
                let data = data_str.as_deref().map(serde_json::from_str).transpose()?;
                Ok((key, FlowState { state, data }))
            })
            .collect()
    }

    async fn save_conversation(
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
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (flow_name, conv_key) DO UPDATE SET
                        state = EXCLUDED.state,
                        data = EXCLUDED.data,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(flow)
                .bind(key)
                .bind(state.state)
                .bind(state.data.as_ref().map(ToString::to_string))
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM conversation_states WHERE flow_name = $1 AND conv_key = $2",
                )
                .bind(flow)
                .bind(key)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn sweep_conversations(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM conversation_states WHERE updated_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn row_to_subscription(row: &PgRow) -> Result<Subscription> {
    let tier_str: String = row.try_get("tier")?;
    Ok(Subscription {
        user_id: row.try_get("user_id")?,
        tier: tier_str.parse().unwrap_or_default(),
        is_active: row.try_get("is_active")?,
        expires_at: row.try_get("expires_at")?,
        payment_method: row.try_get("payment_method")?,
        transaction_id: row.try_get("transaction_id")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_usage(row: &PgRow) -> Result<UsageCounters> {
    Ok(UsageCounters {
        user_id: row.try_get("user_id")?,
        date: row.try_get("date")?,
        messages_count: row.try_get::<i32, _>("messages_count")? as u32,
        summaries_dm_count: row.try_get::<i32, _>("summaries_dm_count")? as u32,
        summaries_count: row.try_get::<i32, _>("summaries_count")? as u32,
        judge_count: row.try_get::<i32, _>("judge_count")? as u32,
    })
}

fn row_to_personality_usage(row: &PgRow) -> Result<PersonalityUsage> {
    Ok(PersonalityUsage {
        user_id: row.try_get("user_id")?,
        personality_name: row.try_get("personality_name")?,
        date: row.try_get("date")?,
        summary_count: row.try_get::<i32, _>("summary_count")? as u32,
        chat_count: row.try_get::<i32, _>("chat_count")? as u32,
        judge_count: row.try_get::<i32, _>("judge_count")? as u32,
    })
}

fn row_to_personality(row: &PgRow) -> Result<Personality> {
    Ok(Personality {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_by_user_id: row.try_get("created_by_user_id")?,
        is_custom: row.try_get("is_custom")?,
        is_active: row.try_get("is_active")?,
        is_blocked: row.try_get("is_blocked")?,
        is_group_bonus: row.try_get("is_group_bonus")?,
        created_at: row.try_get("created_at")?,
    })
}
