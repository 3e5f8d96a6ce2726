//! Entitlement records
//!
//! One row per user holding the plan and its expiry. Premium access is
//! never stored as its own flag: [`is_entitled`] is the single predicate
//! that derives it, and every consumer (API responses, middleware, the
//! frontend's read model) uses this computation. Storing plan and a
//! separate boolean lets the two drift; deriving cannot.

use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime};

use crate::charge::BillingPeriod;

/// Subscription plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Plan::Free => write!(f, "free"),
            Plan::Premium => write!(f, "premium"),
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "premium" => Ok(Plan::Premium),
            other => Err(format!("unknown plan: {}", other)),
        }
    }
}

/// Per-user entitlement row
///
/// Created lazily on first sight of a user (first webhook or first login),
/// mutated by reconciliation grants and the emergency revert, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementRecord {
    pub user_id: String,
    pub email: Option<String>,
    pub plan: Plan,
    /// None means no expiry (free plan, or premium granted without a term)
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl EntitlementRecord {
    /// Derived premium flag; see [`is_entitled`]
    pub fn is_premium(&self, now: OffsetDateTime) -> bool {
        is_entitled(self, now)
    }
}

/// THE premium predicate: premium plan and not expired.
///
/// A null expiry on a premium plan counts as entitled (grant without a
/// computed term). This is the only place premium eligibility is computed.
pub fn is_entitled(record: &EntitlementRecord, now: OffsetDateTime) -> bool {
    record.plan == Plan::Premium && record.expires_at.is_none_or(|expires| expires > now)
}

/// Compute a premium term's expiry: 12 calendar months for yearly billing,
/// 1 for monthly. Day-of-month is clamped when the target month is shorter
/// (Jan 31 + 1 month = Feb 28/29).
pub fn premium_expiry(now: OffsetDateTime, period: BillingPeriod) -> OffsetDateTime {
    let months = match period {
        BillingPeriod::Monthly => 1,
        BillingPeriod::Yearly => 12,
    };
    add_months(now, months)
}

fn add_months(ts: OffsetDateTime, months: i32) -> OffsetDateTime {
    let date = ts.date();
    let zero_based = date.year() * 12 + (date.month() as i32 - 1) + months;
    let year = zero_based.div_euclid(12);
    let month = Month::try_from((zero_based.rem_euclid(12) + 1) as u8).unwrap_or(Month::January);
    let day = date.day().min(time::util::days_in_month(month, year));
    match Date::from_calendar_date(year, month, day) {
        Ok(new_date) => ts.replace_date(new_date),
        // Unreachable with a clamped day; keep the timestamp rather than panic
        Err(_) => ts,
    }
}
