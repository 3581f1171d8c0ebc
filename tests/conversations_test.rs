// ABOUTME: Integration tests for conversation-state persistence
// ABOUTME: Covers rehydration, deletion on None, and the abandonment sweep
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::{Duration, Utc};
use common::memory_database;
use retell_backend::conversations::ConversationStore;
use retell_backend::database_plugins::EntitlementStore;
use retell_backend::models::{ConversationKey, FlowState};
use serde_json::json;

const FLOW: &str = "personality_creation";

#[tokio::test]
async fn states_round_trip_across_store_instances() {
    let db = memory_database().await;
    let key = ConversationKey::new(-100123, 456);

    // One "process instance" saves mid-flow state
    let writer = ConversationStore::new(db.clone());
    let state = FlowState::with_data(2, json!({ "name": "pirate" }));
    writer.save(FLOW, key, Some(&state)).await.unwrap();

    // Another instance, sharing only the store, picks it up
    let reader = ConversationStore::new(db);
    let loaded = reader.load(FLOW).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[&key], state);
}

#[tokio::test]
async fn saving_none_deletes_the_entry() {
    let db = memory_database().await;
    let store = ConversationStore::new(db);
    let key = ConversationKey::new(1, 2);

    store.save(FLOW, key, Some(&FlowState::new(1))).await.unwrap();
    store.save(FLOW, key, None).await.unwrap();

    assert!(store.load(FLOW).await.unwrap().is_empty());
}

#[tokio::test]
async fn steps_overwrite_previous_state() {
    let db = memory_database().await;
    let store = ConversationStore::new(db);
    let key = ConversationKey::new(1, 2);

    store.save(FLOW, key, Some(&FlowState::new(1))).await.unwrap();
    store
        .save(FLOW, key, Some(&FlowState::with_data(2, json!({ "name": "x" }))))
        .await
        .unwrap();

    let loaded = store.load(FLOW).await.unwrap();
    assert_eq!(loaded[&key].state, 2);
}

#[tokio::test]
async fn flows_are_isolated() {
    let db = memory_database().await;
    let store = ConversationStore::new(db);
    let key = ConversationKey::new(1, 2);

    store.save(FLOW, key, Some(&FlowState::new(1))).await.unwrap();
    assert!(store.load("another_flow").await.unwrap().is_empty());
}

#[tokio::test]
async fn unparsable_keys_are_skipped_not_fatal() {
    let db = memory_database().await;

    // A corrupt row written directly at the store layer
    db.save_conversation(FLOW, "not-a-composite-key", Some(&FlowState::new(1)))
        .await
        .unwrap();
    db.save_conversation(FLOW, "10:20", Some(&FlowState::new(3)))
        .await
        .unwrap();

    let store = ConversationStore::new(db);
    let loaded = store.load(FLOW).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[&ConversationKey::new(10, 20)].state, 3);
}

#[tokio::test]
async fn abandoned_entries_are_swept_on_write() {
    let db = memory_database().await;

    // An old row, then a direct sweep proves the threshold logic
    db.save_conversation(FLOW, "1:2", Some(&FlowState::new(1)))
        .await
        .unwrap();
    let removed = db
        .sweep_conversations(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    // A fresh row survives a save-triggered sweep (24h threshold)
    let store = ConversationStore::new(db);
    let key = ConversationKey::new(3, 4);
    store.save(FLOW, key, Some(&FlowState::new(1))).await.unwrap();
    store
        .save(FLOW, ConversationKey::new(5, 6), Some(&FlowState::new(2)))
        .await
        .unwrap();
    assert_eq!(store.load(FLOW).await.unwrap().len(), 2);
}
