// ABOUTME: Core data models and types for the retell backend
// ABOUTME: Defines Tier, Subscription, usage counters and other fundamental records
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Data Models
//!
//! Core data structures for the entitlement layer: subscription records,
//! daily usage counters, membership cache entries, webhook idempotency
//! records and conversation state.
//!
//! ## Design Principles
//!
//! - **Typed action kinds**: quota-limited actions are closed enums, never
//!   free-form strings
//! - **Serializable**: all records support JSON serialization
//! - **Storage agnostic**: nothing here knows which database backend holds it

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A user's subscription level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

impl Tier {
    /// Stable string form used in storage and webhook metadata
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Quota-limited action kinds tracked per user per day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageAction {
    /// Direct-message chat turn
    MessageDm,
    /// Summary requested in a private chat
    SummaryDm,
    /// Summary requested in a group chat
    SummaryGroup,
    /// Judge verdict requested
    Judge,
}

impl UsageAction {
    /// Stable string form used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MessageDm => "message_dm",
            Self::SummaryDm => "summary_dm",
            Self::SummaryGroup => "summary_group",
            Self::Judge => "judge",
        }
    }
}

impl Display for UsageAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// Action kinds tracked per personality for free-tier gating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalityAction {
    Summary,
    Chat,
    Judge,
}

impl PersonalityAction {
    /// Stable string form used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Chat => "chat",
            Self::Judge => "judge",
        }
    }
}

impl Display for PersonalityAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted subscription record. At most one per user; deactivated on
/// expiry rather than deleted so the audit trail survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: i64,
    pub tier: Tier,
    pub is_active: bool,
    /// `None` means the subscription never expires (admin grants)
    pub expires_at: Option<DateTime<Utc>>,
    /// Payment method tag: `manual`, `yookassa`, `telegram_stars`, ...
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether the stored expiry lies in the past
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// Daily usage counters for one user on one UTC calendar day
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub user_id: i64,
    pub date: NaiveDate,
    pub messages_count: u32,
    pub summaries_dm_count: u32,
    pub summaries_count: u32,
    pub judge_count: u32,
}

impl UsageCounters {
    /// Counter value for a single action kind
    #[must_use]
    pub const fn for_action(&self, action: UsageAction) -> u32 {
        match action {
            UsageAction::MessageDm => self.messages_count,
            UsageAction::SummaryDm => self.summaries_dm_count,
            UsageAction::SummaryGroup => self.summaries_count,
            UsageAction::Judge => self.judge_count,
        }
    }
}

/// Daily per-personality usage counters, free-tier gating only
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalityUsage {
    pub user_id: i64,
    pub personality_name: String,
    pub date: NaiveDate,
    pub summary_count: u32,
    pub chat_count: u32,
    pub judge_count: u32,
}

impl PersonalityUsage {
    /// Counter value for a single action kind
    #[must_use]
    pub const fn for_action(&self, action: PersonalityAction) -> u32 {
        match action {
            PersonalityAction::Summary => self.summary_count,
            PersonalityAction::Chat => self.chat_count,
            PersonalityAction::Judge => self.judge_count,
        }
    }
}

/// Cached group membership answer for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub user_id: i64,
    pub is_member: bool,
    pub checked_at: DateTime<Utc>,
}

impl GroupMembership {
    /// Whether the cache entry is older than the freshness TTL
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        (now - self.checked_at).num_seconds() >= crate::constants::limits::GROUP_MEMBERSHIP_TTL_SECS
    }
}

/// Durable marker proving a payment event id was already applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedWebhook {
    pub provider: String,
    pub payment_id: String,
    /// Raw event payload kept for audit
    pub payload: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}

/// Personality record, reduced to the columns the entitlement layer owns.
/// Text/template columns belong to the content CRUD layer and are not
/// modeled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub id: i64,
    pub name: String,
    pub created_by_user_id: Option<i64>,
    pub is_custom: bool,
    pub is_active: bool,
    /// Soft block: visible but unusable (tier downgrade or lost group bonus)
    pub is_blocked: bool,
    /// Granted by the group-membership bonus slot
    pub is_group_bonus: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of a usage or personality limit check, with the raw numbers so
/// callers can render "3/5 used" messaging
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub current: u32,
    /// `None` means no quota configured (unlimited)
    pub limit: Option<u32>,
    pub tier: Tier,
}

impl LimitCheck {
    /// An unconditional pass with no quota attached
    #[must_use]
    pub const fn unlimited(tier: Tier) -> Self {
        Self {
            allowed: true,
            current: 0,
            limit: None,
            tier,
        }
    }
}

/// Why a custom personality cannot be created right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationDenial {
    /// Free tier, not in the group: either path would unlock a slot
    NeedGroupOrPro,
    /// Free tier, already holding the group bonus slot
    NeedPro,
    /// Pro tier, the bonus slot is the only one left to unlock
    NeedGroup,
    /// Every available slot is in use
    MaxReached,
}

impl CreationDenial {
    /// Whether joining the project group would raise the limit
    #[must_use]
    pub const fn needs_group(&self) -> bool {
        matches!(self, Self::NeedGroupOrPro | Self::NeedGroup)
    }

    /// Whether upgrading to pro would raise the limit
    #[must_use]
    pub const fn needs_pro(&self) -> bool {
        matches!(self, Self::NeedGroupOrPro | Self::NeedPro)
    }
}

/// Result of the "can this user create another custom personality" check
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CreationCheck {
    /// `None` means creation is allowed
    pub denial: Option<CreationDenial>,
    pub current: u32,
    pub limit: u32,
    pub tier: Tier,
}

impl CreationCheck {
    /// Whether a new custom personality may be created
    #[must_use]
    pub const fn can_create(&self) -> bool {
        self.denial.is_none()
    }
}

/// Identity of one conversation participant within a flow: the chat the
/// flow runs in plus the acting user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub chat_id: i64,
    pub user_id: i64,
}

impl ConversationKey {
    #[must_use]
    pub const fn new(chat_id: i64, user_id: i64) -> Self {
        Self { chat_id, user_id }
    }

    /// Parse the stored `"chat_id:user_id"` composite form
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let (chat, user) = raw.split_once(':')?;
        Some(Self {
            chat_id: chat.parse().ok()?,
            user_id: user.parse().ok()?,
        })
    }
}

impl Display for ConversationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.chat_id, self.user_id)
    }
}

/// State of one participant in a multi-step flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    /// Step discriminator, matching the flow's state machine
    pub state: i64,
    /// Step-local data collected so far
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl FlowState {
    #[must_use]
    pub const fn new(state: i64) -> Self {
        Self { state, data: None }
    }

    #[must_use]
    pub fn with_data(state: i64, data: serde_json::Value) -> Self {
        Self {
            state,
            data: Some(data),
        }
    }
}

/// A payment confirmed against the provider's authoritative API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedPayment {
    pub payment_id: String,
    pub user_id: i64,
    pub tier: Tier,
    pub duration_days: i64,
    pub amount: f64,
}
