// ABOUTME: Integration tests for the SQLite store primitives
// ABOUTME: Covers the idempotency insert, counter upserts, and personality blocking
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::Utc;
use common::memory_database;
use retell_backend::database::Database;
use retell_backend::database_plugins::EntitlementStore;
use retell_backend::models::{Personality, PersonalityAction, UsageAction};
use serde_json::json;

fn personality(user_id: i64, name: &str) -> Personality {
    Personality {
        id: 0,
        name: name.into(),
        created_by_user_id: Some(user_id),
        is_custom: true,
        is_active: true,
        is_blocked: false,
        is_group_bonus: false,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn webhook_insert_is_first_sighting_exactly_once() {
    let db = memory_database().await;
    let payload = json!({ "event": "payment.succeeded" });

    assert!(db.record_webhook("yookassa", "pay-1", &payload).await.unwrap());
    assert!(!db.record_webhook("yookassa", "pay-1", &payload).await.unwrap());
    assert!(!db.record_webhook("yookassa", "pay-1", &payload).await.unwrap());

    // Same payment id under a different provider is a distinct event
    assert!(db.record_webhook("stars", "pay-1", &payload).await.unwrap());
}

#[tokio::test]
async fn concurrent_duplicate_inserts_admit_exactly_one() {
    let db = memory_database().await;
    let payload = json!({ "event": "payment.succeeded" });

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let db = db.clone();
            let payload = payload.clone();
            tokio::spawn(async move { db.record_webhook("yookassa", "pay-race", &payload).await })
        })
        .collect();

    let mut first_sightings = 0;
    for task in tasks {
        if task.await.unwrap().unwrap() {
            first_sightings += 1;
        }
    }
    assert_eq!(first_sightings, 1);
}

#[tokio::test]
async fn usage_increments_accumulate_per_day_and_action() {
    let db = memory_database().await;

    for _ in 0..3 {
        db.increment_usage(1, UsageAction::MessageDm).await.unwrap();
    }
    db.increment_usage(1, UsageAction::Judge).await.unwrap();

    let usage = db.get_usage(1, Utc::now().date_naive()).await.unwrap().unwrap();
    assert_eq!(usage.messages_count, 3);
    assert_eq!(usage.judge_count, 1);
    assert_eq!(usage.summaries_count, 0);

    // Untouched user has no row at all
    assert!(db.get_usage(2, Utc::now().date_naive()).await.unwrap().is_none());
}

#[tokio::test]
async fn personality_usage_is_keyed_by_personality() {
    let db = memory_database().await;

    db.increment_personality_usage(1, "bydlan", PersonalityAction::Judge)
        .await
        .unwrap();
    db.increment_personality_usage(1, "pirate", PersonalityAction::Judge)
        .await
        .unwrap();

    let today = Utc::now().date_naive();
    let bydlan = db.get_personality_usage(1, "bydlan", today).await.unwrap().unwrap();
    assert_eq!(bydlan.judge_count, 1);
    let pirate = db.get_personality_usage(1, "pirate", today).await.unwrap().unwrap();
    assert_eq!(pirate.judge_count, 1);
}

#[tokio::test]
async fn block_excess_keeps_the_oldest_within_the_limit() {
    let db = memory_database().await;
    let mut ids = Vec::new();
    for name in ["first", "second", "third"] {
        ids.push(db.create_personality(&personality(1, name)).await.unwrap());
        // created_at ties are broken by id, but keep ordering honest
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    db.block_excess_custom_personalities(1, 2).await.unwrap();

    let list = db.list_custom_personalities(1).await.unwrap();
    assert_eq!(list.len(), 3);
    assert!(!list[0].is_blocked, "oldest stays usable");
    assert!(!list[1].is_blocked);
    assert!(list[2].is_blocked, "newest is blocked");

    // Raising the limit unblocks everything again
    db.block_excess_custom_personalities(1, 5).await.unwrap();
    let list = db.list_custom_personalities(1).await.unwrap();
    assert!(list.iter().all(|p| !p.is_blocked));
}

#[tokio::test]
async fn group_bonus_blocking_only_touches_bonus_rows() {
    let db = memory_database().await;
    let paid = db.create_personality(&personality(1, "paid")).await.unwrap();
    let mut bonus = personality(1, "bonus");
    bonus.is_group_bonus = true;
    let bonus = db.create_personality(&bonus).await.unwrap();

    db.set_group_bonus_blocked(1, true).await.unwrap();
    assert!(!db.get_personality(paid).await.unwrap().unwrap().is_blocked);
    assert!(db.get_personality(bonus).await.unwrap().unwrap().is_blocked);

    db.set_group_bonus_blocked(1, false).await.unwrap();
    assert!(!db.get_personality(bonus).await.unwrap().unwrap().is_blocked);
}

#[tokio::test]
async fn membership_cache_round_trips() {
    let db = memory_database().await;
    assert!(db.get_group_membership(9).await.unwrap().is_none());

    db.update_group_membership(9, true).await.unwrap();
    let cache = db.get_group_membership(9).await.unwrap().unwrap();
    assert!(cache.is_member);
    assert!(!cache.is_stale(Utc::now()));

    db.update_group_membership(9, false).await.unwrap();
    assert!(!db.get_group_membership(9).await.unwrap().unwrap().is_member);
}

#[tokio::test]
async fn file_backed_database_is_created_on_demand() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("retell-test.db");
    let url = format!("sqlite:{}", path.display());

    let db = Database::new(&url).await.unwrap();
    db.upsert_subscription(1, retell_backend::models::Tier::Pro, None, "manual", None)
        .await
        .unwrap();

    // A second handle over the same file sees the data
    let again = Database::new(&url).await.unwrap();
    let sub = again.get_subscription(1).await.unwrap().unwrap();
    assert!(sub.is_active);
    assert!(sub.expires_at.is_none());
}
