// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ThreadFlow Payments Module
//!
//! Reconciles crypto payment charges from the commerce processor with
//! per-user plan entitlements.
//!
//! ## Features
//!
//! - **Charge Reconciliation**: Webhook- or client-driven, applied exactly once per charge
//! - **Entitlement Records**: Single source of truth for plan + expiry; premium is always derived
//! - **Signature Verification**: HMAC-SHA256 over the raw webhook body, constant-time compare
//! - **Processor Client**: Charge lookups against the commerce API with bounded timeouts
//! - **Quarantine**: Unattributable webhooks are stored for review, never guessed onto a user

pub mod charge;
pub mod entitlement;
pub mod error;
pub mod processor;
pub mod reconcile;
pub mod signature;
pub mod store;


// Charges
pub use charge::{BillingPeriod, ChargeRecord, ChargeStatus};

// Entitlements
pub use entitlement::{is_entitled, premium_expiry, EntitlementRecord, Plan};

// Error
pub use error::{PaymentsError, PaymentsResult};

// Processor
pub use processor::{
    ChargeDetail, ChargeMetadata, ChargePricing, CommerceClient, CommerceConfig, PaymentAttempt,
    ProcessorApi, ProcessorError, StaticProcessor, TimelineEntry,
};

// Reconciliation
pub use reconcile::{ReconciliationEngine, ReconciliationOutcome, FRESHNESS_WINDOW_MINUTES};

// Store
pub use store::{
    memory::MemoryPaymentStore, postgres::PgPaymentStore, ApplyOutcome, EntitlementGrant,
    PaymentStore, QuarantinedWebhook,
};

/// Embedded migrations for the payments schema
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Run the payments schema migrations against the given pool
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
