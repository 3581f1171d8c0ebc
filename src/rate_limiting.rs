// ABOUTME: Rate limiting engine for per-user request throttling
// ABOUTME: Implements a sliding-window counter with configurable quota and window
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Rate Limiting
//!
//! Per-user sliding-window rate limiter. State is process-local and does not
//! survive a restart; throttling here is a denial-of-abuse mechanism, not a
//! correctness mechanism, so amnesia after redeploys is accepted.
//!
//! Each check runs as one critical section on the user's entry, so a
//! check-then-record pair cannot interleave with another request from the
//! same user.

use crate::config::environment::ThrottleConfig;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request recorded; `remaining` further requests fit in the window
    Allowed { remaining: u32 },
    /// Over quota; retry once `retry_after` has elapsed
    Denied { retry_after: Duration },
}

impl RateLimitDecision {
    /// Whether the request may proceed
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Per-user sliding-window request limiter
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    history: DashMap<i64, Vec<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window` per user
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            history: DashMap::new(),
        }
    }

    /// Create a limiter from the server throttle configuration
    #[must_use]
    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.rate_limit_requests, config.rate_limit_window())
    }

    /// Check the user's quota and, if allowed, record this request
    #[must_use]
    pub fn check(&self, user_id: i64) -> RateLimitDecision {
        self.check_at(user_id, Instant::now())
    }

    fn check_at(&self, user_id: i64, now: Instant) -> RateLimitDecision {
        let mut entry = self.history.entry(user_id).or_default();

        // Drop requests that have left the window
        entry.retain(|ts| now.duration_since(*ts) < self.window);

        let count = entry.len() as u32;
        if count >= self.max_requests {
            // Oldest surviving timestamp determines when a slot frees up
            let oldest = entry
                .first()
                .copied()
                .unwrap_or(now);
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            warn!(user_id, "rate limit exceeded");
            return RateLimitDecision::Denied { retry_after };
        }

        entry.push(now);
        let remaining = self.max_requests - count - 1;
        debug!(user_id, remaining, "rate limit check passed");
        RateLimitDecision::Allowed { remaining }
    }

    /// Forget a user's history (admin/testing escape hatch)
    pub fn clear(&self, user_id: i64) {
        if self.history.remove(&user_id).is_some() {
            debug!(user_id, "cleared rate limit history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exhausts_after_max_requests() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check(7).is_allowed());
        }
        match limiter.check(7) {
            RateLimitDecision::Denied { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                assert!(retry_after <= Duration::from_secs(60));
            }
            RateLimitDecision::Allowed { .. } => panic!("fourth request should be denied"),
        }
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert_eq!(
            limiter.check(1),
            RateLimitDecision::Allowed { remaining: 2 }
        );
        assert_eq!(
            limiter.check(1),
            RateLimitDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.check(1),
            RateLimitDecision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn users_are_isolated() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check(1).is_allowed());
        assert!(limiter.check(2).is_allowed());
        assert!(!limiter.check(1).is_allowed());
    }

    #[test]
    fn window_expiry_frees_slots() {
        let limiter = RateLimiter::new(1, Duration::from_millis(200));
        let start = Instant::now();
        assert!(limiter.check_at(5, start).is_allowed());
        assert!(!limiter.check_at(5, start + Duration::from_millis(100)).is_allowed());
        assert!(limiter.check_at(5, start + Duration::from_millis(250)).is_allowed());
    }

    #[test]
    fn clear_resets_the_user() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check(9).is_allowed());
        assert!(!limiter.check(9).is_allowed());
        limiter.clear(9);
        assert!(limiter.check(9).is_allowed());
    }
}
