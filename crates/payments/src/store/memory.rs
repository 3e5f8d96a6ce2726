//! In-memory payment store
//!
//! Same semantics as the Postgres store behind one async mutex, so the
//! charge-id claim inside `apply_reconciliation` is just as atomic.
//! Used by tests and by offline bring-up environments without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ApplyOutcome, EntitlementGrant, PaymentStore, QuarantinedWebhook};
use crate::charge::{ChargeRecord, ChargeStatus};
use crate::entitlement::{EntitlementRecord, Plan};
use crate::error::PaymentsResult;

#[derive(Default)]
struct Inner {
    users: HashMap<String, EntitlementRecord>,
    charges: HashMap<String, ChargeRecord>,
    quarantine: Vec<QuarantinedWebhook>,
}

#[derive(Default)]
pub struct MemoryPaymentStore {
    inner: Mutex<Inner>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quarantined webhooks, for inspection in tests and admin tooling
    pub async fn quarantined(&self) -> Vec<QuarantinedWebhook> {
        self.inner.lock().await.quarantine.clone()
    }

    /// Seed an existing user row
    pub async fn seed_user(&self, record: EntitlementRecord) {
        self.inner
            .lock()
            .await
            .users
            .insert(record.user_id.clone(), record);
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn find_charge(&self, charge_id: &str) -> PaymentsResult<Option<ChargeRecord>> {
        Ok(self.inner.lock().await.charges.get(charge_id).cloned())
    }

    async fn find_user(&self, user_id: &str) -> PaymentsResult<Option<EntitlementRecord>> {
        Ok(self.inner.lock().await.users.get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> PaymentsResult<Option<EntitlementRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .users
            .values()
            .find(|u| {
                u.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn create_free_user(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> PaymentsResult<EntitlementRecord> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| EntitlementRecord {
                user_id: user_id.to_string(),
                email: email.map(str::to_string),
                plan: Plan::Free,
                expires_at: None,
                updated_at: OffsetDateTime::now_utc(),
            });
        if record.email.is_none() {
            record.email = email.map(str::to_string);
        }
        Ok(record.clone())
    }

    async fn apply_reconciliation(
        &self,
        charge: ChargeRecord,
        grant: EntitlementGrant,
    ) -> PaymentsResult<ApplyOutcome> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.charges.get(&charge.charge_id) {
            return Ok(ApplyOutcome::DuplicateCharge(existing.clone()));
        }
        inner.charges.insert(charge.charge_id.clone(), charge);

        let now = OffsetDateTime::now_utc();
        let record = inner
            .users
            .entry(grant.user_id.clone())
            .or_insert_with(|| EntitlementRecord {
                user_id: grant.user_id.clone(),
                email: grant.email.clone(),
                plan: Plan::Free,
                expires_at: None,
                updated_at: now,
            });
        record.plan = grant.plan;
        record.expires_at = Some(grant.expires_at);
        if record.email.is_none() {
            record.email = grant.email.clone();
        }
        record.updated_at = now;

        Ok(ApplyOutcome::Applied(record.clone()))
    }

    async fn revert_entitlement(
        &self,
        user_id: &str,
    ) -> PaymentsResult<Option<EntitlementRecord>> {
        let mut inner = self.inner.lock().await;

        let Some(record) = inner.users.get_mut(user_id) else {
            return Ok(None);
        };
        record.plan = Plan::Free;
        record.expires_at = None;
        record.updated_at = OffsetDateTime::now_utc();
        let reverted = record.clone();

        for charge in inner.charges.values_mut() {
            if charge.owning_user_id.as_deref() == Some(user_id)
                && matches!(charge.status, ChargeStatus::Pending | ChargeStatus::Confirmed)
            {
                charge.status = ChargeStatus::Cancelled;
            }
        }

        Ok(Some(reverted))
    }

    async fn quarantine_webhook(
        &self,
        charge_id: &str,
        event_type: &str,
        payload: Value,
    ) -> PaymentsResult<()> {
        self.inner.lock().await.quarantine.push(QuarantinedWebhook {
            id: Uuid::new_v4(),
            charge_id: charge_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            received_at: OffsetDateTime::now_utc(),
        });
        Ok(())
    }
}
