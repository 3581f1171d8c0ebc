// ABOUTME: Subscription and entitlement engine resolving tiers and enforcing quotas
// ABOUTME: Handles lazy expiry downgrade, usage limits, and the group-membership bonus
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Subscription / Entitlement Engine
//!
//! Answers "what may this user do right now". Tier resolution is lazy and
//! self-healing: every read checks the stored expiry and downgrades expired
//! subscriptions in place, so no background sweeper is needed and repeated
//! reads after expiry are no-ops.
//!
//! Failure policy is deliberately asymmetric and must stay that way:
//!
//! - **usage limits fail open** — blocking a user over an infra blip is
//!   worse than a few extra uses;
//! - **personality limits fail closed except the neutral personality** —
//!   they guard distinguishable per-personality cost, not a core feature.
//!
//! Checks and recordings are two separate contracts: `check_*` is a pure
//! query, `increment_*` is fire-and-forget. Callers may act even when
//! recording fails.

use crate::constants::tiers;
use crate::database_plugins::EntitlementStore;
use crate::external::{GroupMembershipChecker, UserNotifier};
use crate::models::{
    CreationCheck, CreationDenial, LimitCheck, PersonalityAction, Tier, UsageAction,
};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Subscription and entitlement engine
pub struct SubscriptionService<S: EntitlementStore> {
    store: S,
    membership: Arc<dyn GroupMembershipChecker>,
    notifier: Arc<dyn UserNotifier>,
    project_group_id: Option<i64>,
    neutral_personality: String,
}

impl<S: EntitlementStore> SubscriptionService<S> {
    /// Create the engine over a store and its external collaborators
    pub fn new(
        store: S,
        membership: Arc<dyn GroupMembershipChecker>,
        notifier: Arc<dyn UserNotifier>,
        project_group_id: Option<i64>,
        neutral_personality: impl Into<String>,
    ) -> Self {
        Self {
            store,
            membership,
            notifier,
            project_group_id,
            neutral_personality: neutral_personality.into(),
        }
    }

    // ================================
    // Tier resolution
    // ================================

    /// Resolve a user's current tier.
    ///
    /// An expired-but-active subscription is downgraded on this read:
    /// the record is deactivated and custom personalities are stripped to
    /// the free-tier limit of zero. Store errors resolve to `free`.
    pub async fn resolve_tier(&self, user_id: i64) -> Tier {
        match self.try_resolve_tier(user_id).await {
            Ok(tier) => tier,
            Err(err) => {
                error!(user_id, "failed to resolve tier: {err:#}");
                Tier::Free
            }
        }
    }

    async fn try_resolve_tier(&self, user_id: i64) -> Result<Tier> {
        let Some(subscription) = self.store.get_subscription(user_id).await? else {
            return Ok(Tier::Free);
        };

        if !subscription.is_active {
            return Ok(Tier::Free);
        }

        if subscription.is_expired(Utc::now()) {
            info!(user_id, "subscription expired");
            self.downgrade_expired(user_id).await;
            return Ok(Tier::Free);
        }

        Ok(subscription.tier)
    }

    /// Downgrade an expired subscription. Idempotent: the record ends up
    /// inactive, so a second pass finds nothing to do.
    async fn downgrade_expired(&self, user_id: i64) {
        if let Err(err) = self.store.deactivate_subscription(user_id).await {
            error!(user_id, "failed to deactivate expired subscription: {err:#}");
            return;
        }
        if let Err(err) = self.store.block_excess_custom_personalities(user_id, 0).await {
            error!(user_id, "failed to strip custom personalities on downgrade: {err:#}");
        }
        info!(user_id, "downgraded to free (subscription expired)");
    }

    // ================================
    // Usage limits
    // ================================

    /// Check whether the user may perform an action today. Fails open.
    pub async fn check_usage_limit(&self, user_id: i64, action: UsageAction) -> LimitCheck {
        match self.try_check_usage_limit(user_id, action).await {
            Ok(check) => check,
            Err(err) => {
                error!(user_id, action = action.as_str(), "usage check failed: {err:#}");
                LimitCheck::unlimited(Tier::Free)
            }
        }
    }

    async fn try_check_usage_limit(&self, user_id: i64, action: UsageAction) -> Result<LimitCheck> {
        let tier = self.resolve_tier(user_id).await;

        let Some(limit) = tiers::quotas(tier).for_action(action) else {
            return Ok(LimitCheck::unlimited(tier));
        };

        let current = self
            .store
            .get_usage(user_id, Utc::now().date_naive())
            .await?
            .map_or(0, |usage| usage.for_action(action));

        Ok(LimitCheck {
            allowed: current < limit,
            current,
            limit: Some(limit),
            tier,
        })
    }

    /// Record that an action happened. Fire-and-forget: the action already
    /// ran by the time this is called, so failures are logged, never raised.
    pub async fn increment_usage(&self, user_id: i64, action: UsageAction) {
        if let Err(err) = self.store.increment_usage(user_id, action).await {
            error!(user_id, action = action.as_str(), "failed to record usage: {err:#}");
        }
    }

    // ================================
    // Personality limits
    // ================================

    /// Check whether the user may use a personality for an action today.
    ///
    /// Pro tier and the neutral personality are always allowed. Fails
    /// closed except for the neutral personality.
    pub async fn check_personality_limit(
        &self,
        user_id: i64,
        personality: &str,
        action: PersonalityAction,
    ) -> LimitCheck {
        match self
            .try_check_personality_limit(user_id, personality, action)
            .await
        {
            Ok(check) => check,
            Err(err) => {
                error!(
                    user_id,
                    personality,
                    action = action.as_str(),
                    "personality check failed: {err:#}"
                );
                LimitCheck {
                    allowed: personality == self.neutral_personality,
                    current: 0,
                    limit: tiers::quotas(Tier::Free).personality_daily,
                    tier: Tier::Free,
                }
            }
        }
    }

    async fn try_check_personality_limit(
        &self,
        user_id: i64,
        personality: &str,
        action: PersonalityAction,
    ) -> Result<LimitCheck> {
        let tier = self.resolve_tier(user_id).await;

        if tier == Tier::Pro {
            return Ok(LimitCheck::unlimited(Tier::Pro));
        }

        if personality == self.neutral_personality {
            return Ok(LimitCheck::unlimited(Tier::Free));
        }

        let Some(limit) = tiers::quotas(Tier::Free).personality_daily else {
            return Ok(LimitCheck::unlimited(Tier::Free));
        };

        let current = self
            .store
            .get_personality_usage(user_id, personality, Utc::now().date_naive())
            .await?
            .map_or(0, |usage| usage.for_action(action));

        Ok(LimitCheck {
            allowed: current < limit,
            current,
            limit: Some(limit),
            tier: Tier::Free,
        })
    }

    /// Record a personality use. Skipped entirely for the neutral
    /// personality and for pro users, who carry no personality quota.
    pub async fn increment_personality_usage(
        &self,
        user_id: i64,
        personality: &str,
        action: PersonalityAction,
    ) {
        if personality == self.neutral_personality {
            return;
        }
        if self.resolve_tier(user_id).await == Tier::Pro {
            return;
        }
        if let Err(err) = self
            .store
            .increment_personality_usage(user_id, personality, action)
            .await
        {
            error!(
                user_id,
                personality,
                action = action.as_str(),
                "failed to record personality usage: {err:#}"
            );
        }
    }

    // ================================
    // Group membership bonus
    // ================================

    /// Whether the user belongs to the project group.
    ///
    /// Serves from the cache while it is fresh (1 h TTL) unless `force`
    /// is set. A checker failure answers `false` without touching the
    /// cache — the bonus is withheld, never granted, on error.
    pub async fn is_in_project_group(&self, user_id: i64, force: bool) -> bool {
        let Some(group_id) = self.project_group_id else {
            return false;
        };

        if !force {
            match self.store.get_group_membership(user_id).await {
                Ok(Some(cache)) if !cache.is_stale(Utc::now()) => return cache.is_member,
                Ok(_) => {}
                Err(err) => {
                    error!(user_id, "membership cache read failed: {err:#}");
                }
            }
        }

        match self.membership.is_member(group_id, user_id).await {
            Ok(is_member) => {
                if let Err(err) = self.store.update_group_membership(user_id, is_member).await {
                    error!(user_id, "failed to refresh membership cache: {err:#}");
                }
                is_member
            }
            Err(err) => {
                warn!(user_id, "group membership check failed: {err:#}");
                false
            }
        }
    }

    /// Custom personality slots available to the user right now
    pub async fn custom_personality_limit(&self, user_id: i64) -> u32 {
        let tier = self.resolve_tier(user_id).await;
        let in_group = self.is_in_project_group(user_id, false).await;
        tiers::custom_personality_limit(tier, in_group)
    }

    /// Whether the user may create another custom personality, and if not,
    /// which upgrade path would unlock a slot.
    ///
    /// A failed slot count denies creation (the refusal is classified from
    /// tier and membership as usual).
    pub async fn can_create_custom_personality(&self, user_id: i64) -> CreationCheck {
        let tier = self.resolve_tier(user_id).await;
        let in_group = self.is_in_project_group(user_id, false).await;
        let limit = tiers::custom_personality_limit(tier, in_group);

        let current = match self.store.count_active_custom_personalities(user_id).await {
            Ok(count) => count,
            Err(err) => {
                error!(user_id, "failed to count custom personalities: {err:#}");
                limit
            }
        };

        if current < limit {
            return CreationCheck {
                denial: None,
                current,
                limit,
                tier,
            };
        }

        let denial = match (tier, in_group) {
            (Tier::Free, false) => CreationDenial::NeedGroupOrPro,
            (Tier::Free, true) => CreationDenial::NeedPro,
            (Tier::Pro, false) => CreationDenial::NeedGroup,
            (Tier::Pro, true) => CreationDenial::MaxReached,
        };

        CreationCheck {
            denial: Some(denial),
            current,
            limit,
            tier,
        }
    }

    /// React to the user joining or leaving the project group.
    ///
    /// The only place personalities are blocked or unblocked as a side
    /// effect of group state, decoupled from tier changes. The user notice
    /// is best-effort.
    pub async fn handle_group_membership_change(&self, user_id: i64, is_member: bool) {
        if let Err(err) = self.store.update_group_membership(user_id, is_member).await {
            error!(user_id, "failed to update membership cache: {err:#}");
        }
        info!(user_id, is_member, "group membership changed");

        let (notice, result) = if is_member {
            (
                "Welcome to the project group!\n\n\
                 You can now create 1 bonus custom personality.",
                self.store.set_group_bonus_blocked(user_id, false).await,
            )
        } else {
            (
                "You left the project group.\n\n\
                 Your bonus custom personality is temporarily blocked.\n\
                 Rejoin the group to unblock it!",
                self.store.set_group_bonus_blocked(user_id, true).await,
            )
        };

        if let Err(err) = result {
            error!(user_id, is_member, "failed to adjust bonus personalities: {err:#}");
            return;
        }

        if let Err(err) = self.notifier.send_message(user_id, notice).await {
            warn!(user_id, "could not notify user about bonus change: {err:#}");
        }
    }

    // ================================
    // Subscription mutation
    // ================================

    /// Create or renew a subscription. Used by the payment webhook
    /// processor and admin grants alike.
    ///
    /// After the upsert, personality blocking is re-applied for the new
    /// tier (including the group bonus slot), so an upgrade unblocks what
    /// now fits and a paid downgrade blocks what no longer does.
    ///
    /// # Errors
    ///
    /// Returns an error only if the subscription write itself fails; the
    /// blocking adjustment is best-effort.
    pub async fn create_or_update_subscription(
        &self,
        user_id: i64,
        tier: Tier,
        duration_days: i64,
        payment_method: &str,
        transaction_id: Option<&str>,
    ) -> Result<()> {
        let expires_at = Utc::now() + Duration::days(duration_days);

        self.store
            .upsert_subscription(
                user_id,
                tier,
                Some(expires_at),
                payment_method,
                transaction_id,
            )
            .await?;

        info!(
            user_id,
            tier = tier.as_str(),
            duration_days,
            payment_method,
            "subscription created/updated"
        );

        let in_group = self.is_in_project_group(user_id, false).await;
        let limit = tiers::custom_personality_limit(tier, in_group);
        if let Err(err) = self
            .store
            .block_excess_custom_personalities(user_id, limit)
            .await
        {
            error!(user_id, limit, "failed to re-apply personality blocking: {err:#}");
        }

        Ok(())
    }

    /// The store handle, for callers that need raw reads (status screens)
    pub const fn store(&self) -> &S {
        &self.store
    }
}
