//! Charge record types
//!
//! A charge record is the reconciliation ledger row for one processor
//! charge, keyed by the processor-assigned charge id. The primary key is
//! the idempotency key: one charge applies its entitlement effect at most
//! once, no matter how many times the webhook is redelivered.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entitlement::Plan;

/// Billing cadence stamped into charge metadata at charge creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    #[default]
    Monthly,
    Yearly,
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BillingPeriod::Monthly => write!(f, "monthly"),
            BillingPeriod::Yearly => write!(f, "yearly"),
        }
    }
}

impl std::str::FromStr for BillingPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(BillingPeriod::Monthly),
            "yearly" => Ok(BillingPeriod::Yearly),
            other => Err(format!("unknown billing period: {}", other)),
        }
    }
}

/// Reconciliation status of a charge record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Entitlement granted optimistically on a submitted-but-unconfirmed payment
    Pending,
    /// Entitlement granted on a fully confirmed payment
    Confirmed,
    /// Terminal business rejection, kept for audit
    Rejected,
    /// Duplicate delivery resolved against an existing record
    AlreadyProcessed,
    /// Cancelled by an emergency revert
    Cancelled,
}

impl ChargeStatus {
    /// Statuses that mean the charge's effect has been applied
    pub fn is_applied(&self) -> bool {
        matches!(self, ChargeStatus::Confirmed | ChargeStatus::AlreadyProcessed)
    }
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChargeStatus::Pending => write!(f, "pending"),
            ChargeStatus::Confirmed => write!(f, "confirmed"),
            ChargeStatus::Rejected => write!(f, "rejected"),
            ChargeStatus::AlreadyProcessed => write!(f, "already_processed"),
            ChargeStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ChargeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChargeStatus::Pending),
            "confirmed" => Ok(ChargeStatus::Confirmed),
            "rejected" => Ok(ChargeStatus::Rejected),
            "already_processed" => Ok(ChargeStatus::AlreadyProcessed),
            "cancelled" => Ok(ChargeStatus::Cancelled),
            other => Err(format!("unknown charge status: {}", other)),
        }
    }
}

/// One reconciled (or reconciling) processor charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRecord {
    /// Processor-assigned charge id (unique key, idempotency key)
    pub charge_id: String,
    /// Resolved owning user, None until resolution succeeds
    pub owning_user_id: Option<String>,
    pub plan: Plan,
    pub billing_period: BillingPeriod,
    pub status: ChargeStatus,
    /// Informational only; never validated against a price table
    pub amount: Option<String>,
    pub currency: Option<String>,
    /// Charge creation time per the processor's clock (freshness check input)
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When reconciliation wrote this record
    #[serde(with = "time::serde::rfc3339")]
    pub processed_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ChargeStatus::Pending,
            ChargeStatus::Confirmed,
            ChargeStatus::Rejected,
            ChargeStatus::AlreadyProcessed,
            ChargeStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<ChargeStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_applied_statuses() {
        assert!(ChargeStatus::Confirmed.is_applied());
        assert!(ChargeStatus::AlreadyProcessed.is_applied());
        assert!(!ChargeStatus::Pending.is_applied());
        assert!(!ChargeStatus::Cancelled.is_applied());
    }

    #[test]
    fn test_billing_period_parse() {
        assert_eq!("yearly".parse(), Ok(BillingPeriod::Yearly));
        assert!("weekly".parse::<BillingPeriod>().is_err());
    }
}
