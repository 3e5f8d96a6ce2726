//! Route definitions

pub mod payments;
pub mod webhooks;

#[cfg(test)]
mod webhook_tests;

use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use serde_json::{json, Value};

use crate::auth::auth_middleware;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Session-authenticated endpoints; the asserted user id always comes
    // from the verified token, never from the request body
    let authed = Router::new()
        .route("/payments/activate", post(payments::activate))
        .route("/payments/entitlement", get(payments::entitlement))
        .route("/payments/revert", post(payments::revert))
        .layer(middleware::from_fn_with_state(
            state.auth_state(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/webhooks/payments", post(webhooks::handle_payment_webhook))
        .merge(authed)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
