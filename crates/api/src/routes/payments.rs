//! Payment activation and entitlement endpoints
//!
//! The activation endpoint is the pull half of reconciliation: the client
//! calls it right after the checkout redirect, usually before the webhook
//! lands. It runs the same engine; "awaiting payment" is a poll-again
//! signal here, not an error.

use axum::extract::State;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use threadflow_payments::{is_entitled, EntitlementRecord, Plan, ReconciliationOutcome};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub charge_id: String,
    /// Accepted for wire compatibility; charge metadata is authoritative
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub billing_period: Option<String>,
}

fn format_expiry(expires_at: Option<OffsetDateTime>) -> Value {
    expires_at
        .and_then(|t| t.format(&Rfc3339).ok())
        .map(Value::String)
        .unwrap_or(Value::Null)
}

fn entitlement_body(status: &str, record: &EntitlementRecord, now: OffsetDateTime) -> Value {
    json!({
        "success": true,
        "status": status,
        "user": record.user_id,
        "plan": record.plan,
        "is_premium": is_entitled(record, now),
        "expires_at": format_expiry(record.expires_at),
    })
}

pub async fn activate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ActivateRequest>,
) -> ApiResult<Json<Value>> {
    if request.charge_id.is_empty() {
        return Err(ApiError::BadRequest("charge_id is required".to_string()));
    }
    tracing::debug!(
        charge_id = %request.charge_id,
        user_id = %user.user_id,
        plan_id = ?request.plan_id,
        billing_period = ?request.billing_period,
        "Manual activation requested"
    );

    let now = OffsetDateTime::now_utc();
    let outcome = state.engine.reconcile(&request.charge_id, &user.user_id).await?;

    match outcome {
        ReconciliationOutcome::Applied { entitlement, .. } => {
            Ok(Json(entitlement_body("applied", &entitlement, now)))
        }
        ReconciliationOutcome::AlreadyProcessed { owning_user_id } => {
            // Indistinguishable from success except for the status field
            let user_id = owning_user_id.unwrap_or_else(|| user.user_id.clone());
            let record = state.store.find_user(&user_id).await?;
            Ok(Json(match record {
                Some(record) => entitlement_body("already_processed", &record, now),
                None => json!({ "success": true, "status": "already_processed", "user": user_id }),
            }))
        }
        ReconciliationOutcome::AwaitingPayment => {
            Ok(Json(json!({ "success": true, "status": "processing" })))
        }
        ReconciliationOutcome::TooOld { age_minutes } => Err(ApiError::Rejected(format!(
            "this charge is {} minutes old and can no longer be activated; \
             please start a new checkout or contact support",
            age_minutes
        ))),
        ReconciliationOutcome::UserMismatch { .. } => Err(ApiError::Forbidden(
            "this charge belongs to a different account".to_string(),
        )),
    }
}

pub async fn entitlement(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    let now = OffsetDateTime::now_utc();
    let record = state.store.find_user(&user.user_id).await?;

    Ok(Json(match record {
        Some(record) => json!({
            "user": record.user_id,
            "plan": record.plan,
            "is_premium": is_entitled(&record, now),
            "expires_at": format_expiry(record.expires_at),
        }),
        None => json!({
            "user": user.user_id,
            "plan": Plan::Free,
            "is_premium": false,
            "expires_at": Value::Null,
        }),
    }))
}

pub async fn revert(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Value>> {
    match state.engine.revert(&user.user_id).await? {
        Some(record) => Ok(Json(json!({
            "success": true,
            "user": record.user_id,
            "plan": record.plan,
            "is_premium": false,
        }))),
        None => Err(ApiError::NotFound(
            "no entitlement record for this user".to_string(),
        )),
    }
}
