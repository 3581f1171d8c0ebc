// ABOUTME: Shared test fixtures for integration tests
// ABOUTME: In-memory store plus recording doubles for the external collaborators
//
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use retell_backend::database_plugins::{factory::Database, EntitlementStore};
use retell_backend::external::{GroupMembershipChecker, PaymentVerifier, UserNotifier};
use retell_backend::models::VerifiedPayment;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Fresh in-memory store with migrations applied
pub async fn memory_database() -> Database {
    Database::new("sqlite::memory:")
        .await
        .expect("in-memory database")
}

/// Membership oracle answering a fixed value, flippable mid-test
pub struct StaticMembership {
    member: AtomicBool,
    pub calls: AtomicUsize,
}

impl StaticMembership {
    pub fn new(member: bool) -> Self {
        Self {
            member: AtomicBool::new(member),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_member(&self, member: bool) {
        self.member.store(member, Ordering::SeqCst);
    }
}

#[async_trait]
impl GroupMembershipChecker for StaticMembership {
    async fn is_member(&self, _group_id: i64, _user_id: i64) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.member.load(Ordering::SeqCst))
    }
}

/// Membership oracle whose transport always fails
pub struct FailingMembership;

#[async_trait]
impl GroupMembershipChecker for FailingMembership {
    async fn is_member(&self, _group_id: i64, _user_id: i64) -> Result<bool> {
        Err(anyhow!("transport down"))
    }
}

/// Notifier that records every message it was asked to deliver
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(i64, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

#[async_trait]
impl UserNotifier for RecordingNotifier {
    async fn send_message(&self, user_id: i64, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push((user_id, text.into()));
        Ok(())
    }
}

/// Verifier backed by a fixed table of settled payments
pub struct StaticVerifier {
    payments: HashMap<String, VerifiedPayment>,
    pub calls: AtomicUsize,
}

impl StaticVerifier {
    pub fn new(payments: Vec<VerifiedPayment>) -> Self {
        Self {
            payments: payments
                .into_iter()
                .map(|p| (p.payment_id.clone(), p))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl PaymentVerifier for StaticVerifier {
    async fn verify_payment(&self, payment_id: &str) -> Result<Option<VerifiedPayment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.payments.get(payment_id).cloned())
    }
}
