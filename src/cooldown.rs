// ABOUTME: Per-chat action cooldown tracking to prevent command spam
// ABOUTME: Single-timestamp gate per (chat, action) pair with a fixed duration
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Cooldown Tracking
//!
//! Unlike the rate limiter this tracks a single timestamp per (chat, action)
//! pair: an action is blocked until the cooldown has elapsed since it was
//! last *performed* in that chat. The caller decides when an action counts
//! as performed and calls [`CooldownTracker::set`] — a denied check never
//! pushes the gate further out.
//!
//! State is process-local; a restart clears all cooldowns.

use crate::config::environment::ThrottleConfig;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Actions gated by a per-chat cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownAction {
    Summary,
    Judge,
}

impl CooldownAction {
    /// Stable string form used in logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Judge => "judge",
        }
    }
}

/// Outcome of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownStatus {
    /// No active cooldown for this chat and action
    Ready,
    /// Blocked; `remaining` until the gate opens
    Active { remaining: Duration },
}

impl CooldownStatus {
    /// Whether the action may proceed
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Per-(chat, action) time gate
pub struct CooldownTracker {
    cooldown: Duration,
    last_performed: DashMap<(i64, CooldownAction), Instant>,
}

impl CooldownTracker {
    /// Create a tracker with the given cooldown duration
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_performed: DashMap::new(),
        }
    }

    /// Create a tracker from the server throttle configuration
    #[must_use]
    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.cooldown())
    }

    /// Check whether the action is currently gated in this chat
    #[must_use]
    pub fn check(&self, chat_id: i64, action: CooldownAction) -> CooldownStatus {
        self.check_at(chat_id, action, Instant::now())
    }

    fn check_at(&self, chat_id: i64, action: CooldownAction, now: Instant) -> CooldownStatus {
        match self.last_performed.get(&(chat_id, action)) {
            Some(last) => {
                let elapsed = now.duration_since(*last);
                if elapsed < self.cooldown {
                    let remaining = self.cooldown - elapsed;
                    debug!(chat_id, action = action.as_str(), ?remaining, "cooldown active");
                    CooldownStatus::Active { remaining }
                } else {
                    CooldownStatus::Ready
                }
            }
            None => CooldownStatus::Ready,
        }
    }

    /// Record that the action was just performed in this chat
    pub fn set(&self, chat_id: i64, action: CooldownAction) {
        self.last_performed.insert((chat_id, action), Instant::now());
        debug!(chat_id, action = action.as_str(), "cooldown set");
    }

    /// Clear the gate for an action (admin/testing escape hatch)
    pub fn clear(&self, chat_id: i64, action: CooldownAction) {
        if self.last_performed.remove(&(chat_id, action)).is_some() {
            debug!(chat_id, action = action.as_str(), "cooldown cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_chat_is_ready() {
        let tracker = CooldownTracker::new(Duration::from_secs(60));
        assert!(tracker.check(1, CooldownAction::Summary).is_ready());
    }

    #[test]
    fn set_blocks_until_cooldown_elapses() {
        let tracker = CooldownTracker::new(Duration::from_secs(60));
        tracker.set(1, CooldownAction::Judge);
        match tracker.check(1, CooldownAction::Judge) {
            CooldownStatus::Active { remaining } => {
                assert!(remaining > Duration::ZERO);
                assert!(remaining <= Duration::from_secs(60));
            }
            CooldownStatus::Ready => panic!("cooldown should be active"),
        }
    }

    #[test]
    fn actions_and_chats_are_independent() {
        let tracker = CooldownTracker::new(Duration::from_secs(60));
        tracker.set(1, CooldownAction::Summary);
        assert!(tracker.check(1, CooldownAction::Judge).is_ready());
        assert!(tracker.check(2, CooldownAction::Summary).is_ready());
    }

    #[test]
    fn gate_opens_after_the_cooldown() {
        let tracker = CooldownTracker::new(Duration::from_millis(100));
        tracker.set(3, CooldownAction::Summary);
        let later = Instant::now() + Duration::from_millis(150);
        assert!(tracker.check_at(3, CooldownAction::Summary, later).is_ready());
    }

    #[test]
    fn failed_check_does_not_extend_the_gate() {
        let tracker = CooldownTracker::new(Duration::from_millis(100));
        tracker.set(4, CooldownAction::Judge);
        let _ = tracker.check(4, CooldownAction::Judge);
        let later = Instant::now() + Duration::from_millis(150);
        assert!(tracker.check_at(4, CooldownAction::Judge, later).is_ready());
    }

    #[test]
    fn clear_resets_the_gate() {
        let tracker = CooldownTracker::new(Duration::from_secs(60));
        tracker.set(5, CooldownAction::Summary);
        tracker.clear(5, CooldownAction::Summary);
        assert!(tracker.check(5, CooldownAction::Summary).is_ready());
    }
}
