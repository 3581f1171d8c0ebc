// ABOUTME: Conversation-state persistence for stateless multi-step flows
// ABOUTME: Rehydrates and stores per-participant flow state with an abandonment sweep
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Conversation-State Persistence
//!
//! Two consecutive steps of a multi-step flow (the personality-creation
//! wizard, for instance) may be handled by different process instances with
//! no shared memory. State is rehydrated from the store at the start of a
//! step and persisted at the end.
//!
//! Every write sweeps entries older than 24 hours, bounding storage growth
//! from abandoned flows without a scheduler.

use crate::constants::limits::CONVERSATION_MAX_AGE_HOURS;
use crate::database_plugins::EntitlementStore;
use crate::models::{ConversationKey, FlowState};
use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tracing::warn;

/// Conversation-state persistence over the entitlement store
pub struct ConversationStore<S: EntitlementStore> {
    store: S,
}

impl<S: EntitlementStore> ConversationStore<S> {
    /// Create the persistence layer over a store handle
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Load every participant's state for a flow.
    ///
    /// Rows whose stored key does not parse as `chat_id:user_id` are
    /// skipped with a warning; one corrupt row must not strand the flow.
    ///
    /// # Errors
    ///
    /// Returns an error if the store read fails.
    pub async fn load(&self, flow: &str) -> Result<HashMap<ConversationKey, FlowState>> {
        let rows = self.store.load_conversations(flow).await?;

        let mut conversations = HashMap::with_capacity(rows.len());
        for (raw_key, state) in rows {
            match ConversationKey::parse(&raw_key) {
                Some(key) => {
                    conversations.insert(key, state);
                }
                None => {
                    warn!(flow, raw_key, "skipping unparsable conversation key");
                }
            }
        }
        Ok(conversations)
    }

    /// Persist one participant's state; `None` ends the flow and deletes
    /// the entry. Every call sweeps abandoned entries afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails; a failed sweep is only
    /// logged, the write itself already succeeded.
    pub async fn save(
        &self,
        flow: &str,
        key: ConversationKey,
        state: Option<&FlowState>,
    ) -> Result<()> {
        self.store
            .save_conversation(flow, &key.to_string(), state)
            .await?;

        let threshold = Utc::now() - Duration::hours(CONVERSATION_MAX_AGE_HOURS);
        if let Err(err) = self.store.sweep_conversations(threshold).await {
            warn!(flow, "conversation sweep failed: {err:#}");
        }
        Ok(())
    }
}
