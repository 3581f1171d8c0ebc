// ABOUTME: Integration tests for the rate limiter and cooldown tracker
// ABOUTME: Covers window exhaustion, wait-time bounds, and gate independence
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use retell_backend::config::environment::ThrottleConfig;
use retell_backend::cooldown::{CooldownAction, CooldownStatus, CooldownTracker};
use retell_backend::rate_limiting::{RateLimitDecision, RateLimiter};
use std::time::Duration;

const REQUESTS: u32 = 10;
const WINDOW: Duration = Duration::from_secs(60);

#[test]
fn exactly_the_configured_quota_passes_within_a_window() {
    let limiter = RateLimiter::new(REQUESTS, WINDOW);

    for i in 0..REQUESTS {
        assert!(
            limiter.check(100).is_allowed(),
            "request {i} should be allowed"
        );
    }

    match limiter.check(100) {
        RateLimitDecision::Denied { retry_after } => {
            assert!(retry_after > Duration::ZERO);
            assert!(retry_after <= WINDOW);
        }
        RateLimitDecision::Allowed { .. } => panic!("request over quota was allowed"),
    }
}

#[test]
fn denials_do_not_consume_quota() {
    let limiter = RateLimiter::new(2, WINDOW);
    assert!(limiter.check(5).is_allowed());
    assert!(limiter.check(5).is_allowed());

    // Repeated denials must keep reporting a wait, not pile onto history
    for _ in 0..5 {
        assert!(!limiter.check(5).is_allowed());
    }
    assert!(limiter.check(6).is_allowed(), "other users stay unaffected");
}

#[test]
fn from_config_uses_the_throttle_settings() {
    let config = ThrottleConfig {
        rate_limit_requests: 1,
        rate_limit_window_secs: 60,
        cooldown_secs: 60,
    };
    let limiter = RateLimiter::from_config(&config);
    assert!(limiter.check(1).is_allowed());
    assert!(!limiter.check(1).is_allowed());
}

#[test]
fn cooldown_gates_per_chat_and_action() {
    let tracker = CooldownTracker::new(Duration::from_secs(60));

    assert!(tracker.check(-100, CooldownAction::Summary).is_ready());
    tracker.set(-100, CooldownAction::Summary);

    match tracker.check(-100, CooldownAction::Summary) {
        CooldownStatus::Active { remaining } => {
            assert!(remaining > Duration::ZERO);
            assert!(remaining <= Duration::from_secs(60));
        }
        CooldownStatus::Ready => panic!("cooldown should be active"),
    }

    // A different action in the same chat, and the same action in a
    // different chat, are unaffected
    assert!(tracker.check(-100, CooldownAction::Judge).is_ready());
    assert!(tracker.check(-200, CooldownAction::Summary).is_ready());
}

#[test]
fn short_cooldowns_expire() {
    let tracker = CooldownTracker::new(Duration::from_millis(50));
    tracker.set(1, CooldownAction::Judge);
    std::thread::sleep(Duration::from_millis(80));
    assert!(tracker.check(1, CooldownAction::Judge).is_ready());
}

#[test]
fn short_windows_recover() {
    let limiter = RateLimiter::new(1, Duration::from_millis(50));
    assert!(limiter.check(9).is_allowed());
    assert!(!limiter.check(9).is_allowed());
    std::thread::sleep(Duration::from_millis(80));
    assert!(limiter.check(9).is_allowed());
}
