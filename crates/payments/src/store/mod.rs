//! Persistence seam for charges and entitlements
//!
//! The engine talks to one trait. The Postgres implementation backs
//! production; the in-memory implementation backs tests and offline
//! bring-up with identical semantics, including the atomic
//! insert-if-absent on the charge id.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::charge::ChargeRecord;
use crate::entitlement::{EntitlementRecord, Plan};
use crate::error::PaymentsResult;

/// The entitlement half of a reconciliation write
#[derive(Debug, Clone)]
pub struct EntitlementGrant {
    pub user_id: String,
    pub email: Option<String>,
    pub plan: Plan,
    pub expires_at: OffsetDateTime,
}

/// Result of the atomic grant + charge write
#[derive(Debug)]
pub enum ApplyOutcome {
    /// Charge claimed and entitlement written; returns the updated row
    Applied(EntitlementRecord),
    /// A record for this charge id already existed; nothing was written
    DuplicateCharge(ChargeRecord),
}

/// A charge-bearing webhook whose owning user could not be resolved,
/// parked for manual review instead of being guessed onto a user
#[derive(Debug, Clone)]
pub struct QuarantinedWebhook {
    pub id: Uuid,
    pub charge_id: String,
    pub event_type: String,
    pub payload: Value,
    pub received_at: OffsetDateTime,
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn find_charge(&self, charge_id: &str) -> PaymentsResult<Option<ChargeRecord>>;

    async fn find_user(&self, user_id: &str) -> PaymentsResult<Option<EntitlementRecord>>;

    async fn find_user_by_email(&self, email: &str) -> PaymentsResult<Option<EntitlementRecord>>;

    /// Lazy user creation on first sight; no-op if the row already exists
    async fn create_free_user(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> PaymentsResult<EntitlementRecord>;

    /// Atomic unit of reconciliation: insert the charge record if absent
    /// and upsert the entitlement in one transaction. A lost race on the
    /// charge id resolves to [`ApplyOutcome::DuplicateCharge`]; the
    /// entitlement is never written twice for one charge.
    async fn apply_reconciliation(
        &self,
        charge: ChargeRecord,
        grant: EntitlementGrant,
    ) -> PaymentsResult<ApplyOutcome>;

    /// Emergency revert: plan back to free, expiry cleared, the user's
    /// recent non-terminal charge records marked cancelled. Returns None
    /// for an unknown user.
    async fn revert_entitlement(&self, user_id: &str)
        -> PaymentsResult<Option<EntitlementRecord>>;

    /// Park an unattributable webhook for manual review
    async fn quarantine_webhook(
        &self,
        charge_id: &str,
        event_type: &str,
        payload: Value,
    ) -> PaymentsResult<()>;
}
