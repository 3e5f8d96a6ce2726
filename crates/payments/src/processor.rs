//! Commerce processor client
//!
//! Wraps the processor's "get charge" endpoint. The webhook only carries a
//! snapshot from delivery time; reconciliation always re-fetches the
//! charge's current state here before deciding anything.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;

/// Default commerce API base
pub const DEFAULT_API_BASE: &str = "https://api.commerce.coinbase.com";

/// Bounded timeout for charge fetches. A timeout is a transient failure,
/// never "payment not found".
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Charge lookup failures
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// 404-class response: the charge id does not exist at the processor
    #[error("charge not found at payment processor")]
    NotFound,
    /// Network error, timeout, or non-2xx response; safe to retry
    #[error("payment processor unavailable: {0}")]
    Transient(String),
}

/// One lifecycle event on a charge's timeline
#[derive(Debug, Clone, Deserialize)]
pub struct TimelineEntry {
    #[serde(default)]
    pub time: Option<String>,
    pub status: String,
}

/// One payment attempt against a charge
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentAttempt {
    pub status: String,
}

/// Informational amount/currency from the charge's pricing block
#[derive(Debug, Clone, Deserialize)]
pub struct ChargePricing {
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Free-form key/value bag stamped at charge-creation time.
///
/// The charge-creation step always writes the owning user id; older
/// charges may only carry an email.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChargeMetadata {
    #[serde(default, alias = "clerk_user_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub billing_period: Option<String>,
    #[serde(default, alias = "customer_email")]
    pub email: Option<String>,
}

/// Current state of a charge as reported by the processor
#[derive(Debug, Clone, Deserialize)]
pub struct ChargeDetail {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub confirmed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
    #[serde(default)]
    pub payments: Vec<PaymentAttempt>,
    #[serde(default)]
    pub pricing: Option<ChargePricing>,
    #[serde(default)]
    pub metadata: ChargeMetadata,
}

fn is_confirmed_status(status: &str) -> bool {
    status.eq_ignore_ascii_case("confirmed")
        || status.eq_ignore_ascii_case("completed")
        || status.eq_ignore_ascii_case("resolved")
}

impl ChargeDetail {
    /// Payment fully confirmed: a confirmation timestamp, or any timeline
    /// entry or payment attempt in a confirmed/completed/resolved state.
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
            || self.timeline.iter().any(|t| is_confirmed_status(&t.status))
            || self.payments.iter().any(|p| is_confirmed_status(&p.status))
    }

    /// Pending timeline with at least one submitted payment attempt.
    /// This is the instant-upgrade allowance: entitlement is granted at
    /// submission time instead of waiting for full confirmation.
    pub fn has_submitted_payment(&self) -> bool {
        self.timeline
            .iter()
            .any(|t| t.status.eq_ignore_ascii_case("pending"))
            && self
                .payments
                .iter()
                .any(|p| p.status.eq_ignore_ascii_case("pending"))
    }
}

/// Capability: fetch a charge's current lifecycle state by id
#[async_trait]
pub trait ProcessorApi: Send + Sync {
    async fn fetch_charge(&self, charge_id: &str) -> Result<ChargeDetail, ProcessorError>;
}

/// Commerce API configuration
#[derive(Debug, Clone)]
pub struct CommerceConfig {
    pub api_key: String,
    pub base_url: String,
}

impl CommerceConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// The charge endpoint wraps the charge under a `data` key
#[derive(Debug, Deserialize)]
struct ChargeEnvelope {
    data: ChargeDetail,
}

/// HTTP client for the commerce processor's charge API
#[derive(Clone)]
pub struct CommerceClient {
    http: reqwest::Client,
    config: CommerceConfig,
}

impl CommerceClient {
    pub fn new(config: CommerceConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ProcessorApi for CommerceClient {
    async fn fetch_charge(&self, charge_id: &str) -> Result<ChargeDetail, ProcessorError> {
        let url = format!(
            "{}/charges/{}",
            self.config.base_url.trim_end_matches('/'),
            charge_id
        );

        let response = self
            .http
            .get(&url)
            .header("X-CC-Api-Key", &self.config.api_key)
            .header("X-CC-Version", "2018-03-22")
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(charge_id = %charge_id, error = %e, "Charge fetch failed");
                ProcessorError::Transient(e.to_string())
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProcessorError::NotFound);
        }
        if !status.is_success() {
            return Err(ProcessorError::Transient(format!(
                "charge fetch returned {}",
                status
            )));
        }

        let envelope: ChargeEnvelope = response
            .json()
            .await
            .map_err(|e| ProcessorError::Transient(format!("charge response malformed: {}", e)))?;

        Ok(envelope.data)
    }
}

/// In-memory processor fake serving pre-loaded charges.
///
/// Pairs with [`crate::MemoryPaymentStore`] for offline bring-up and
/// engine tests; anything not loaded resolves to [`ProcessorError::NotFound`].
#[derive(Default)]
pub struct StaticProcessor {
    charges: tokio::sync::Mutex<std::collections::HashMap<String, ChargeDetail>>,
}

impl StaticProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, charge: ChargeDetail) {
        self.charges.lock().await.insert(charge.id.clone(), charge);
    }
}

#[async_trait]
impl ProcessorApi for StaticProcessor {
    async fn fetch_charge(&self, charge_id: &str) -> Result<ChargeDetail, ProcessorError> {
        self.charges
            .lock()
            .await
            .get(charge_id)
            .cloned()
            .ok_or(ProcessorError::NotFound)
    }
}
