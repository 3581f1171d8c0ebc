// ABOUTME: Database factory and provider abstraction for multi-database support
// ABOUTME: Provides unified interface for SQLite and PostgreSQL with runtime selection
//! Database factory for creating database providers
//!
//! This module provides automatic database type detection and creation
//! based on connection strings.

use super::sqlite::SqliteDatabase;
use super::EntitlementStore;
use crate::models::{
    FlowState, GroupMembership, Personality, PersonalityAction, PersonalityUsage,
    ProcessedWebhook, Subscription, Tier, UsageAction, UsageCounters,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info};

#[cfg(feature = "postgresql")]
use super::postgres::PostgresDatabase;

/// Supported database types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseType {
    SQLite,
    PostgreSQL,
}

/// Database instance wrapper that delegates to the appropriate implementation
#[derive(Clone)]
pub enum Database {
    SQLite(SqliteDatabase),
    #[cfg(feature = "postgresql")]
    PostgreSQL(PostgresDatabase),
}

impl Database {
    /// Get a descriptive string for the current database backend
    #[must_use]
    pub const fn backend_info(&self) -> &'static str {
        match self {
            Self::SQLite(_) => "SQLite (Local Development)",
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(_) => "PostgreSQL (Cloud-Ready)",
        }
    }

    /// Get the database type enum
    #[must_use]
    pub const fn database_type(&self) -> DatabaseType {
        match self {
            Self::SQLite(_) => DatabaseType::SQLite,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(_) => DatabaseType::PostgreSQL,
        }
    }
}

/// Automatically detect database type from connection string
///
/// # Errors
///
/// Returns an error if the URL format is not recognized, or a `PostgreSQL`
/// URL is provided while the `postgresql` feature is disabled.
pub fn detect_database_type(database_url: &str) -> Result<DatabaseType> {
    if database_url.starts_with("sqlite:") {
        Ok(DatabaseType::SQLite)
    } else if database_url.starts_with("postgresql://") || database_url.starts_with("postgres://") {
        #[cfg(feature = "postgresql")]
        return Ok(DatabaseType::PostgreSQL);

        #[cfg(not(feature = "postgresql"))]
        Err(anyhow!(
            "PostgreSQL support not enabled. Enable the 'postgresql' feature flag."
        ))
    } else {
        Err(anyhow!(
            "Unsupported database URL format: must start with 'sqlite:' or 'postgresql://'"
        ))
    }
}

#[async_trait]
impl EntitlementStore for Database {
    async fn new(database_url: &str) -> Result<Self> {
        debug!("Detecting database type from URL");
        let db_type = detect_database_type(database_url)?;
        info!("Detected database type: {:?}", db_type);

        match db_type {
            DatabaseType::SQLite => {
                let db = SqliteDatabase::new(database_url).await?;
                info!("SQLite database initialized");
                Ok(Self::SQLite(db))
            }
            #[cfg(feature = "postgresql")]
            DatabaseType::PostgreSQL => {
                let db = PostgresDatabase::new(database_url).await?;
                info!("PostgreSQL database initialized");
                Ok(Self::PostgreSQL(db))
            }
            #[cfg(not(feature = "postgresql"))]
            DatabaseType::PostgreSQL => {
                Err(anyhow!("PostgreSQL support not enabled"))
            }
        }
    }

    async fn migrate(&self) -> Result<()> {
        match self {
            Self::SQLite(db) => db.migrate().await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.migrate().await,
        }
    }

    async fn get_subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        match self {
            Self::SQLite(db) => db.get_subscription(user_id).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.get_subscription(user_id).await,
        }
    }

    async fn upsert_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        expires_at: Option<DateTime<Utc>>,
        payment_method: &str,
        transaction_id: Option<&str>,
    ) -> Result<()> {
        match self {
            Self::SQLite(db) => {
                db.upsert_subscription(user_id, tier, expires_at, payment_method, transaction_id)
                    .await
            }
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => {
                db.upsert_subscription(user_id, tier, expires_at, payment_method, transaction_id)
                    .await
            }
        }
    }

    async fn deactivate_subscription(&self, user_id: i64) -> Result<()> {
        match self {
            Self::SQLite(db) => db.deactivate_subscription(user_id).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.deactivate_subscription(user_id).await,
        }
    }

    async fn get_usage(&self, user_id: i64, day: NaiveDate) -> Result<Option<UsageCounters>> {
        match self {
            Self::SQLite(db) => db.get_usage(user_id, day).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.get_usage(user_id, day).await,
        }
    }

    async fn increment_usage(&self, user_id: i64, action: UsageAction) -> Result<()> {
        match self {
            Self::SQLite(db) => db.increment_usage(user_id, action).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.increment_usage(user_id, action).await,
        }
    }

    async fn get_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        day: NaiveDate,
    ) -> Result<Option<PersonalityUsage>> {
        match self {
            Self::SQLite(db) => db.get_personality_usage(user_id, personality, day).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.get_personality_usage(user_id, personality, day).await,
        }
    }

    async fn increment_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        action: PersonalityAction,
    ) -> Result<()> {
        match self {
            Self::SQLite(db) => {
                db.increment_personality_usage(user_id, personality, action)
                    .await
            }
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => {
                db.increment_personality_usage(user_id, personality, action)
                    .await
            }
        }
    }

    async fn get_group_membership(&self, user_id: i64) -> Result<Option<GroupMembership>> {
        match self {
            Self::SQLite(db) => db.get_group_membership(user_id).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.get_group_membership(user_id).await,
        }
    }

    async fn update_group_membership(&self, user_id: i64, is_member: bool) -> Result<()> {
        match self {
            Self::SQLite(db) => db.update_group_membership(user_id, is_member).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.update_group_membership(user_id, is_member).await,
        }
    }

    async fn record_webhook(
        &self,
        provider: &str,
        payment_id: &str,
        payload: &Value,
    ) -> Result<bool> {
        match self {
            Self::SQLite(db) => db.record_webhook(provider, payment_id, payload).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.record_webhook(provider, payment_id, payload).await,
        }
    }

    async fn get_processed_webhook(
        &self,
        provider: &str,
        payment_id: &str,
    ) -> Result<Option<ProcessedWebhook>> {
        match self {
            Self::SQLite(db) => db.get_processed_webhook(provider, payment_id).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.get_processed_webhook(provider, payment_id).await,
        }
    }

    async fn create_personality(&self, personality: &Personality) -> Result<i64> {
        match self {
            Self::SQLite(db) => db.create_personality(personality).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.create_personality(personality).await,
        }
    }

    async fn get_personality(&self, id: i64) -> Result<Option<Personality>> {
        match self {
            Self::SQLite(db) => db.get_personality(id).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.get_personality(id).await,
        }
    }

    async fn list_custom_personalities(&self, user_id: i64) -> Result<Vec<Personality>> {
        match self {
            Self::SQLite(db) => db.list_custom_personalities(user_id).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.list_custom_personalities(user_id).await,
        }
    }

    async fn count_active_custom_personalities(&self, user_id: i64) -> Result<u32> {
        match self {
            Self::SQLite(db) => db.count_active_custom_personalities(user_id).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.count_active_custom_personalities(user_id).await,
        }
    }

    async fn block_excess_custom_personalities(&self, user_id: i64, limit: u32) -> Result<()> {
        match self {
            Self::SQLite(db) => db.block_excess_custom_personalities(user_id, limit).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.block_excess_custom_personalities(user_id, limit).await,
        }
    }

    async fn set_group_bonus_blocked(&self, user_id: i64, blocked: bool) -> Result<()> {
        match self {
            Self::SQLite(db) => db.set_group_bonus_blocked(user_id, blocked).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.set_group_bonus_blocked(user_id, blocked).await,
        }
    }

    async fn load_conversations(&self, flow: &str) -> Result<Vec<(String, FlowState)>> {
        match self {
            Self::SQLite(db) => db.load_conversations(flow).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.load_conversations(flow).await,
        }
    }

    async fn save_conversation(
        &self,
        flow: &str,
        key: &str,
        state: Option<&FlowState>,
    ) -> Result<()> {
        match self {
            Self::SQLite(db) => db.save_conversation(flow, key, state).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.save_conversation(flow, key, state).await,
        }
    }

    async fn sweep_conversations(&self, older_than: DateTime<Utc>) -> Result<u64> {
        match self {
            Self::SQLite(db) => db.sweep_conversations(older_than).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.sweep_conversations(older_than).await,
        }
    }
}
