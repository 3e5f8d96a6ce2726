//! Charge reconciliation
//!
//! The single entry point both the webhook ingress and the manual
//! activation endpoint funnel through. Given a charge id and the user the
//! caller asserts owns it, reads the charge's true state from the
//! processor and applies its entitlement effect exactly once.
//!
//! Deliveries are at-least-once and unordered; the charge-id claim inside
//! [`PaymentStore::apply_reconciliation`] is what makes concurrent
//! duplicates collapse to a single grant.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::charge::{BillingPeriod, ChargeRecord, ChargeStatus};
use crate::entitlement::{premium_expiry, EntitlementRecord, Plan};
use crate::error::PaymentsResult;
use crate::processor::ProcessorApi;
use crate::store::{ApplyOutcome, EntitlementGrant, PaymentStore};

/// Charges older than this are rejected outright, payment status
/// notwithstanding, to bound the blast radius of a leaked or replayed
/// charge id.
pub const FRESHNESS_WINDOW_MINUTES: i64 = 30;

/// Terminal decision for one reconciliation attempt.
///
/// These are business outcomes, not errors: the webhook path acks all of
/// them with 200 because redelivery cannot change any of them.
#[derive(Debug)]
pub enum ReconciliationOutcome {
    /// Entitlement written and charge record persisted
    Applied {
        entitlement: EntitlementRecord,
        charge: ChargeRecord,
    },
    /// This charge already had its effect; idempotent no-op
    AlreadyProcessed { owning_user_id: Option<String> },
    /// No completed or submitted payment yet; retry later
    AwaitingPayment,
    /// Charge predates the freshness window
    TooOld { age_minutes: i64 },
    /// Charge metadata names a different owner than the caller asserts
    UserMismatch { metadata_user_id: String },
}

impl ReconciliationOutcome {
    /// Wire-level status label used in responses and logs
    pub fn status_label(&self) -> &'static str {
        match self {
            ReconciliationOutcome::Applied { .. } => "applied",
            ReconciliationOutcome::AlreadyProcessed { .. } => "already_processed",
            ReconciliationOutcome::AwaitingPayment => "awaiting_payment",
            ReconciliationOutcome::TooOld { .. } => "too_old",
            ReconciliationOutcome::UserMismatch { .. } => "user_mismatch",
        }
    }
}

/// The reconciliation state machine
pub struct ReconciliationEngine {
    store: Arc<dyn PaymentStore>,
    processor: Arc<dyn ProcessorApi>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn PaymentStore>, processor: Arc<dyn ProcessorApi>) -> Self {
        Self { store, processor }
    }

    pub fn store(&self) -> &Arc<dyn PaymentStore> {
        &self.store
    }

    /// Reconcile a charge against the asserted owning user.
    ///
    /// Fails closed when the processor or store is unreachable; the caller
    /// maps that to its retry mechanism. Every other path resolves to a
    /// [`ReconciliationOutcome`].
    pub async fn reconcile(
        &self,
        charge_id: &str,
        asserted_user_id: &str,
    ) -> PaymentsResult<ReconciliationOutcome> {
        self.reconcile_at(charge_id, asserted_user_id, OffsetDateTime::now_utc())
            .await
    }

    /// [`Self::reconcile`] with an explicit clock, for deterministic tests
    pub async fn reconcile_at(
        &self,
        charge_id: &str,
        asserted_user_id: &str,
        now: OffsetDateTime,
    ) -> PaymentsResult<ReconciliationOutcome> {
        // Always re-fetch; the webhook snapshot may be stale or forged.
        let detail = self.processor.fetch_charge(charge_id).await?;

        let age_minutes = (now - detail.created_at).whole_minutes();
        if age_minutes > FRESHNESS_WINDOW_MINUTES {
            tracing::warn!(
                charge_id = %charge_id,
                age_minutes = age_minutes,
                "Charge outside freshness window, rejecting"
            );
            return Ok(ReconciliationOutcome::TooOld { age_minutes });
        }

        if let Some(existing) = self.store.find_charge(charge_id).await? {
            if existing.status.is_applied() {
                tracing::info!(
                    charge_id = %charge_id,
                    owning_user_id = ?existing.owning_user_id,
                    "Charge already processed, idempotent no-op"
                );
                return Ok(ReconciliationOutcome::AlreadyProcessed {
                    owning_user_id: existing.owning_user_id,
                });
            }
            // Pending/rejected/cancelled records fall through; the atomic
            // claim below still resolves any duplicate to AlreadyProcessed.
        }

        // Anti-fraud: a charge created for user A must not entitle user B.
        // Absent metadata is not a mismatch; proceed on the asserted id.
        if let Some(metadata_user_id) = detail.metadata.user_id.as_deref() {
            if metadata_user_id != asserted_user_id {
                tracing::warn!(
                    charge_id = %charge_id,
                    asserted_user_id = %asserted_user_id,
                    metadata_user_id = %metadata_user_id,
                    "Charge owner mismatch, rejecting"
                );
                return Ok(ReconciliationOutcome::UserMismatch {
                    metadata_user_id: metadata_user_id.to_string(),
                });
            }
        }

        let confirmed = detail.is_confirmed();
        let pending_submitted = detail.has_submitted_payment();
        if !confirmed && !pending_submitted {
            return Ok(ReconciliationOutcome::AwaitingPayment);
        }

        // Resolve the target user: asserted id, then metadata email, then
        // lazy-create. Reconciliation never fails just because the user
        // row doesn't exist yet.
        let email = detail.metadata.email.as_deref();
        let target_user_id = match self.store.find_user(asserted_user_id).await? {
            Some(user) => user.user_id,
            None => {
                let by_email = match email {
                    Some(email) => self.store.find_user_by_email(email).await?,
                    None => None,
                };
                match by_email {
                    Some(user) => user.user_id,
                    None => {
                        self.store
                            .create_free_user(asserted_user_id, email)
                            .await?
                            .user_id
                    }
                }
            }
        };

        let plan = detail
            .metadata
            .plan
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(Plan::Premium);
        let billing_period = detail
            .metadata
            .billing_period
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(BillingPeriod::Monthly);
        let expires_at = premium_expiry(now, billing_period);

        let charge = ChargeRecord {
            charge_id: charge_id.to_string(),
            owning_user_id: Some(target_user_id.clone()),
            plan,
            billing_period,
            // Confirmed wins when both signals are present
            status: if confirmed {
                ChargeStatus::Confirmed
            } else {
                ChargeStatus::Pending
            },
            amount: detail.pricing.as_ref().and_then(|p| p.amount.clone()),
            currency: detail.pricing.as_ref().and_then(|p| p.currency.clone()),
            created_at: detail.created_at,
            processed_at: now,
        };
        let grant = EntitlementGrant {
            user_id: target_user_id.clone(),
            email: email.map(str::to_string),
            plan,
            expires_at,
        };

        match self.store.apply_reconciliation(charge.clone(), grant).await? {
            ApplyOutcome::Applied(entitlement) => {
                tracing::info!(
                    charge_id = %charge_id,
                    user_id = %target_user_id,
                    plan = %plan,
                    confirmed = confirmed,
                    expires_at = %expires_at,
                    "Entitlement applied"
                );
                Ok(ReconciliationOutcome::Applied {
                    entitlement,
                    charge,
                })
            }
            ApplyOutcome::DuplicateCharge(existing) => {
                tracing::info!(
                    charge_id = %charge_id,
                    "Lost charge claim race, resolving as already processed"
                );
                Ok(ReconciliationOutcome::AlreadyProcessed {
                    owning_user_id: existing.owning_user_id,
                })
            }
        }
    }

    /// Read a user's entitlement row
    pub async fn entitlement_for(
        &self,
        user_id: &str,
    ) -> PaymentsResult<Option<EntitlementRecord>> {
        self.store.find_user(user_id).await
    }

    /// Emergency revert to free (operator/fraud-response path)
    pub async fn revert(&self, user_id: &str) -> PaymentsResult<Option<EntitlementRecord>> {
        let reverted = self.store.revert_entitlement(user_id).await?;
        if reverted.is_some() {
            tracing::warn!(user_id = %user_id, "Entitlement reverted to free");
        }
        Ok(reverted)
    }
}
