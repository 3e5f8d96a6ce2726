//! Postgres-backed payment store
//!
//! Idempotency rests on the primary key of `charges`:
//! `INSERT ... ON CONFLICT DO NOTHING RETURNING` atomically claims the
//! charge id, so two concurrent reconciliations for the same charge
//! cannot both grant the entitlement. An EXISTS-then-INSERT pattern in
//! application code would race.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ApplyOutcome, EntitlementGrant, PaymentStore};
use crate::charge::{BillingPeriod, ChargeRecord, ChargeStatus};
use crate::entitlement::{EntitlementRecord, Plan};
use crate::error::PaymentsResult;

/// How far back a revert cancels the user's charge records
const REVERT_CANCEL_WINDOW_DAYS: i32 = 90;

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: String,
    email: Option<String>,
    plan: String,
    expires_at: Option<OffsetDateTime>,
    updated_at: OffsetDateTime,
}

impl UserRow {
    fn into_record(self) -> EntitlementRecord {
        EntitlementRecord {
            user_id: self.user_id,
            email: self.email,
            // Lenient read: an unknown plan string downgrades to free
            plan: self.plan.parse().unwrap_or(Plan::Free),
            expires_at: self.expires_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ChargeRow {
    charge_id: String,
    owning_user_id: Option<String>,
    plan: String,
    billing_period: String,
    status: String,
    amount: Option<String>,
    currency: Option<String>,
    created_at: OffsetDateTime,
    processed_at: OffsetDateTime,
}

impl ChargeRow {
    fn into_record(self) -> ChargeRecord {
        ChargeRecord {
            charge_id: self.charge_id,
            owning_user_id: self.owning_user_id,
            plan: self.plan.parse().unwrap_or(Plan::Premium),
            billing_period: self.billing_period.parse().unwrap_or(BillingPeriod::Monthly),
            status: self.status.parse().unwrap_or(ChargeStatus::Pending),
            amount: self.amount,
            currency: self.currency,
            created_at: self.created_at,
            processed_at: self.processed_at,
        }
    }
}

/// Production store over the payments schema
#[derive(Clone)]
pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn find_charge(&self, charge_id: &str) -> PaymentsResult<Option<ChargeRecord>> {
        let row: Option<ChargeRow> = sqlx::query_as(
            r#"
            SELECT charge_id, owning_user_id, plan, billing_period, status,
                   amount, currency, created_at, processed_at
            FROM charges
            WHERE charge_id = $1
            "#,
        )
        .bind(charge_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ChargeRow::into_record))
    }

    async fn find_user(&self, user_id: &str) -> PaymentsResult<Option<EntitlementRecord>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT user_id, email, plan, expires_at, updated_at FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_record))
    }

    async fn find_user_by_email(&self, email: &str) -> PaymentsResult<Option<EntitlementRecord>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT user_id, email, plan, expires_at, updated_at
            FROM users
            WHERE LOWER(email) = LOWER($1)
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UserRow::into_record))
    }

    async fn create_free_user(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> PaymentsResult<EntitlementRecord> {
        let row: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (user_id, email, plan, expires_at, updated_at)
            VALUES ($1, $2, 'free', NULL, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                email = COALESCE(users.email, EXCLUDED.email)
            RETURNING user_id, email, plan, expires_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_record())
    }

    async fn apply_reconciliation(
        &self,
        charge: ChargeRecord,
        grant: EntitlementGrant,
    ) -> PaymentsResult<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        // Atomic claim on the charge id. No row back means another
        // reconciliation got here first (or already had).
        let claimed: Option<ChargeRow> = sqlx::query_as(
            r#"
            INSERT INTO charges
                (charge_id, owning_user_id, plan, billing_period, status,
                 amount, currency, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (charge_id) DO NOTHING
            RETURNING charge_id, owning_user_id, plan, billing_period, status,
                      amount, currency, created_at, processed_at
            "#,
        )
        .bind(&charge.charge_id)
        .bind(&charge.owning_user_id)
        .bind(charge.plan.to_string())
        .bind(charge.billing_period.to_string())
        .bind(charge.status.to_string())
        .bind(&charge.amount)
        .bind(&charge.currency)
        .bind(charge.created_at)
        .bind(charge.processed_at)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            let existing = self
                .find_charge(&charge.charge_id)
                .await?
                .ok_or_else(|| crate::PaymentsError::ChargeMissing(charge.charge_id.clone()))?;
            return Ok(ApplyOutcome::DuplicateCharge(existing));
        }

        // Same transaction as the claim: a failed entitlement write rolls
        // the charge record back so redelivery can retry cleanly.
        let user: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (user_id, email, plan, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                plan = EXCLUDED.plan,
                expires_at = EXCLUDED.expires_at,
                email = COALESCE(users.email, EXCLUDED.email),
                updated_at = NOW()
            RETURNING user_id, email, plan, expires_at, updated_at
            "#,
        )
        .bind(&grant.user_id)
        .bind(&grant.email)
        .bind(grant.plan.to_string())
        .bind(grant.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ApplyOutcome::Applied(user.into_record()))
    }

    async fn revert_entitlement(
        &self,
        user_id: &str,
    ) -> PaymentsResult<Option<EntitlementRecord>> {
        let mut tx = self.pool.begin().await?;

        let user: Option<UserRow> = sqlx::query_as(
            r#"
            UPDATE users
            SET plan = 'free', expires_at = NULL, updated_at = NOW()
            WHERE user_id = $1
            RETURNING user_id, email, plan, expires_at, updated_at
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user) = user else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE charges
            SET status = 'cancelled'
            WHERE owning_user_id = $1
              AND status IN ('pending', 'confirmed')
              AND processed_at > NOW() - ($2 || ' days')::INTERVAL
            "#,
        )
        .bind(user_id)
        .bind(REVERT_CANCEL_WINDOW_DAYS)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(user.into_record()))
    }

    async fn quarantine_webhook(
        &self,
        charge_id: &str,
        event_type: &str,
        payload: Value,
    ) -> PaymentsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_quarantine (id, charge_id, event_type, payload, received_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(charge_id)
        .bind(event_type)
        .bind(payload)
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            charge_id = %charge_id,
            event_type = %event_type,
            "Webhook quarantined for manual review (owning user unresolvable)"
        );

        Ok(())
    }
}
