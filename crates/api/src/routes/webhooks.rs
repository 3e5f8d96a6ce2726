//! Payment processor webhook ingress
//!
//! Deliveries are at-least-once and unordered. Response codes drive the
//! processor's retry loop: 200 acknowledges everything terminal (including
//! business rejections, which redelivery cannot change), 500 asks for
//! redelivery, 401 refuses a bad signature outright.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use threadflow_payments::signature;

use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-cc-webhook-signature";

pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Verify over the exact raw bytes before any parsing
    if let Some(secret) = &state.config.commerce_webhook_secret {
        let sig = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if sig.is_empty() {
            return reply(StatusCode::BAD_REQUEST, json!({ "error": "missing signature header" }));
        }
        if !signature::verify(&body, sig, secret) {
            tracing::warn!("Webhook rejected: invalid signature");
            return reply(StatusCode::UNAUTHORIZED, json!({ "error": "invalid signature" }));
        }
    } else {
        tracing::warn!("Webhook accepted WITHOUT signature verification (no secret configured)");
    }

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Webhook body is not valid JSON");
            return reply(StatusCode::BAD_REQUEST, json!({ "error": "malformed JSON body" }));
        }
    };

    // The delivery envelope may nest the event beside delivery metadata
    // such as attempt_number; unwrap it before dispatch
    let event = parsed.get("event").cloned().unwrap_or(parsed);
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    if !event_type.starts_with("charge:") {
        tracing::debug!(event_type = %event_type, "Ignoring non-charge webhook event");
        return reply(StatusCode::OK, json!({ "received": true, "status": "ignored" }));
    }

    let data = event.get("data").cloned().unwrap_or(Value::Null);
    let Some(charge_id) = data
        .get("id")
        .or_else(|| data.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        tracing::warn!(event_type = %event_type, "Charge event without a charge id");
        return reply(StatusCode::BAD_REQUEST, json!({ "error": "charge event missing charge id" }));
    };

    // Attribute the charge to a user: metadata user id, else a user row
    // matching the metadata email. Unattributable deliveries are
    // quarantined for review, never guessed onto a user.
    let metadata = data.get("metadata");
    let metadata_user_id = metadata
        .and_then(|m| m.get("clerk_user_id").or_else(|| m.get("user_id")))
        .and_then(Value::as_str)
        .map(str::to_string);

    let user_id = match metadata_user_id {
        Some(user_id) => user_id,
        None => {
            let email = metadata
                .and_then(|m| m.get("email").or_else(|| m.get("customer_email")))
                .and_then(Value::as_str);
            let by_email = match email {
                Some(email) => match state.store.find_user_by_email(email).await {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::error!(error = %e, "User lookup failed during webhook attribution");
                        return reply(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            json!({ "error": "store unavailable, please redeliver" }),
                        );
                    }
                },
                None => None,
            };
            match by_email {
                Some(user) => user.user_id,
                None => {
                    return match state
                        .store
                        .quarantine_webhook(&charge_id, &event_type, event.clone())
                        .await
                    {
                        Ok(()) => reply(
                            StatusCode::OK,
                            json!({ "received": true, "status": "quarantined" }),
                        ),
                        Err(e) => {
                            tracing::error!(error = %e, charge_id = %charge_id, "Quarantine write failed");
                            reply(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                json!({ "error": "store unavailable, please redeliver" }),
                            )
                        }
                    };
                }
            }
        }
    };

    match state.engine.reconcile(&charge_id, &user_id).await {
        Ok(outcome) => {
            tracing::info!(
                charge_id = %charge_id,
                event_type = %event_type,
                outcome = outcome.status_label(),
                "Webhook reconciliation complete"
            );
            reply(
                StatusCode::OK,
                json!({ "received": true, "status": outcome.status_label() }),
            )
        }
        Err(err) if err.is_transient() => {
            tracing::warn!(
                charge_id = %charge_id,
                error = %err,
                "Transient failure, requesting webhook redelivery"
            );
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "temporary failure, please redeliver" }),
            )
        }
        Err(err) => {
            // Terminal fetch failure (charge unknown at the processor);
            // redelivery would not change it
            tracing::warn!(charge_id = %charge_id, error = %err, "Charge unresolvable, acknowledging");
            reply(
                StatusCode::OK,
                json!({ "received": true, "status": "unresolvable" }),
            )
        }
    }
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}
