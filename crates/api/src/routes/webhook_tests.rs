// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! End-to-end route tests over the in-memory store and processor fake
//!
//! Covers the webhook ingress response-code contract, attribution and
//! quarantine, and the authenticated activation/entitlement/revert flow.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};
use tower::ServiceExt;

use threadflow_payments::{
    ChargeDetail, ChargeMetadata, EntitlementRecord, MemoryPaymentStore, PaymentStore, Plan,
    StaticProcessor, TimelineEntry,
};

use crate::config::Config;
use crate::routes::create_router;
use crate::state::AppState;

const SECRET: &str = "whsec_test";

fn test_config(secret: Option<&str>, auth_api_url: &str) -> Config {
    Config {
        database_url: String::new(),
        bind_address: "127.0.0.1:0".to_string(),
        commerce_api_key: "test-key".to_string(),
        commerce_api_base: "http://127.0.0.1:1/unused".to_string(),
        commerce_webhook_secret: secret.map(str::to_string),
        auth_api_url: auth_api_url.to_string(),
        auth_anon_key: "anon-key".to_string(),
        allowed_origins: String::new(),
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryPaymentStore>,
    processor: Arc<StaticProcessor>,
}

fn test_app(secret: Option<&str>, auth_api_url: &str) -> TestApp {
    let store = Arc::new(MemoryPaymentStore::new());
    let processor = Arc::new(StaticProcessor::new());
    let state = AppState::with_components(
        test_config(secret, auth_api_url),
        store.clone(),
        processor.clone(),
    );
    TestApp {
        router: create_router(state),
        store,
        processor,
    }
}

/// Confirmed charge created 2 minutes ago, owned by `user_id`
fn confirmed_charge(id: &str, user_id: Option<&str>, email: Option<&str>) -> ChargeDetail {
    ChargeDetail {
        id: id.to_string(),
        created_at: OffsetDateTime::now_utc() - Duration::minutes(2),
        confirmed_at: None,
        timeline: vec![TimelineEntry {
            time: None,
            status: "CONFIRMED".to_string(),
        }],
        payments: vec![],
        pricing: None,
        metadata: ChargeMetadata {
            user_id: user_id.map(str::to_string),
            plan: Some("premium".to_string()),
            billing_period: Some("monthly".to_string()),
            email: email.map(str::to_string),
        },
    }
}

fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn webhook_body(event_type: &str, data: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "attempt_number": 1,
        "event": { "id": "evt_1", "type": event_type, "data": data }
    }))
    .unwrap()
}

fn webhook_request(body: Vec<u8>, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("x-cc-webhook-signature", sig);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =========================================================================
// Webhook ingress
// =========================================================================

#[tokio::test]
async fn test_signed_confirmed_webhook_applies_entitlement() {
    let app = test_app(Some(SECRET), "");
    app.processor
        .insert(confirmed_charge("ch_1", Some("u1"), None))
        .await;

    let body = webhook_body(
        "charge:confirmed",
        json!({ "id": "ch_1", "metadata": { "clerk_user_id": "u1" } }),
    );
    let sig = sign(&body, SECRET);

    let response = app
        .router
        .oneshot(webhook_request(body, Some(&sig)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "applied");

    let user = app.store.find_user("u1").await.unwrap().unwrap();
    assert_eq!(user.plan, Plan::Premium);
}

#[tokio::test]
async fn test_invalid_signature_is_401_and_no_processing() {
    let app = test_app(Some(SECRET), "");
    app.processor
        .insert(confirmed_charge("ch_1", Some("u1"), None))
        .await;

    let body = webhook_body(
        "charge:confirmed",
        json!({ "id": "ch_1", "metadata": { "clerk_user_id": "u1" } }),
    );
    let sig = sign(&body, "wrong-secret");

    let response = app
        .router
        .oneshot(webhook_request(body, Some(&sig)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.store.find_user("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_signature_header_is_400() {
    let app = test_app(Some(SECRET), "");
    let body = webhook_body("charge:confirmed", json!({ "id": "ch_1" }));

    let response = app
        .router
        .oneshot(webhook_request(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unconfigured_secret_processes_without_verification() {
    let app = test_app(None, "");
    app.processor
        .insert(confirmed_charge("ch_1", Some("u1"), None))
        .await;

    let body = webhook_body(
        "charge:confirmed",
        json!({ "id": "ch_1", "metadata": { "clerk_user_id": "u1" } }),
    );

    let response = app
        .router
        .oneshot(webhook_request(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "applied");
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let app = test_app(None, "");
    let response = app
        .router
        .oneshot(webhook_request(b"not json".to_vec(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_charge_event_is_acknowledged_untouched() {
    let app = test_app(None, "");
    let body = webhook_body("wallet:created", json!({ "id": "w_1" }));

    let response = app
        .router
        .oneshot(webhook_request(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ignored");
}

#[tokio::test]
async fn test_unwraps_top_level_event_without_envelope() {
    let app = test_app(None, "");
    app.processor
        .insert(confirmed_charge("ch_1", Some("u1"), None))
        .await;

    // Some deliveries arrive without the envelope nesting
    let body = serde_json::to_vec(&json!({
        "type": "charge:confirmed",
        "data": { "id": "ch_1", "metadata": { "clerk_user_id": "u1" } }
    }))
    .unwrap();

    let response = app
        .router
        .oneshot(webhook_request(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "applied");
}

#[tokio::test]
async fn test_unattributable_charge_is_quarantined() {
    let app = test_app(None, "");
    app.processor
        .insert(confirmed_charge("ch_orphan", None, None))
        .await;

    let body = webhook_body("charge:confirmed", json!({ "id": "ch_orphan", "metadata": {} }));

    let response = app
        .router
        .oneshot(webhook_request(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "quarantined");

    let quarantined = app.store.quarantined().await;
    assert_eq!(quarantined.len(), 1);
    assert_eq!(quarantined[0].charge_id, "ch_orphan");
    assert!(app.store.find_charge("ch_orphan").await.unwrap().is_none());
}

#[tokio::test]
async fn test_email_attribution_resolves_existing_user() {
    let app = test_app(None, "");
    app.store
        .seed_user(EntitlementRecord {
            user_id: "u_mail".to_string(),
            email: Some("buyer@example.com".to_string()),
            plan: Plan::Free,
            expires_at: None,
            updated_at: OffsetDateTime::now_utc(),
        })
        .await;
    app.processor
        .insert(confirmed_charge(
            "ch_mail",
            None,
            Some("buyer@example.com"),
        ))
        .await;

    let body = webhook_body(
        "charge:confirmed",
        json!({ "id": "ch_mail", "metadata": { "email": "buyer@example.com" } }),
    );

    let response = app
        .router
        .oneshot(webhook_request(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "applied");

    let user = app.store.find_user("u_mail").await.unwrap().unwrap();
    assert_eq!(user.plan, Plan::Premium);
}

#[tokio::test]
async fn test_replayed_webhook_acks_already_processed() {
    let app = test_app(None, "");
    app.processor
        .insert(confirmed_charge("ch_1", Some("u1"), None))
        .await;

    let body = webhook_body(
        "charge:confirmed",
        json!({ "id": "ch_1", "metadata": { "clerk_user_id": "u1" } }),
    );

    let first = app
        .router
        .clone()
        .oneshot(webhook_request(body.clone(), None))
        .await
        .unwrap();
    assert_eq!(json_body(first).await["status"], "applied");

    let replay = app
        .router
        .oneshot(webhook_request(body, None))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(json_body(replay).await["status"], "already_processed");
}

// =========================================================================
// Manual activation flow (authenticated)
// =========================================================================

fn activate_request(charge_id: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/payments/activate")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(
            serde_json::to_vec(&json!({ "charge_id": charge_id })).unwrap(),
        ))
        .unwrap()
}

fn authed_request(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

async fn mock_auth_server(user_id: &str) -> mockito::ServerGuard {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/user")
        .with_status(200)
        .with_body(format!(r#"{{"id":"{}","email":null}}"#, user_id))
        .create_async()
        .await;
    server
}

#[tokio::test]
async fn test_activate_requires_session() {
    let app = test_app(None, "http://127.0.0.1:1/unused");
    let response = app
        .router
        .oneshot(activate_request("ch_1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_activate_then_replay_then_entitlement_then_revert() {
    let auth = mock_auth_server("u1").await;
    let app = test_app(None, &auth.url());
    app.processor
        .insert(confirmed_charge("ch_1", Some("u1"), None))
        .await;

    // First activation applies
    let response = app
        .router
        .clone()
        .oneshot(activate_request("ch_1", Some("tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "applied");
    assert_eq!(body["plan"], "premium");
    assert_eq!(body["is_premium"], true);
    assert!(body["expires_at"].is_string());

    // Replay is a success-shaped no-op
    let replay = app
        .router
        .clone()
        .oneshot(activate_request("ch_1", Some("tok")))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::OK);
    let body = json_body(replay).await;
    assert_eq!(body["status"], "already_processed");
    assert_eq!(body["is_premium"], true);

    // Entitlement read reflects the single computation
    let ent = app
        .router
        .clone()
        .oneshot(authed_request("GET", "/payments/entitlement", "tok"))
        .await
        .unwrap();
    let body = json_body(ent).await;
    assert_eq!(body["is_premium"], true);

    // Revert drops back to free
    let revert = app
        .router
        .clone()
        .oneshot(authed_request("POST", "/payments/revert", "tok"))
        .await
        .unwrap();
    assert_eq!(revert.status(), StatusCode::OK);

    let ent = app
        .router
        .oneshot(authed_request("GET", "/payments/entitlement", "tok"))
        .await
        .unwrap();
    let body = json_body(ent).await;
    assert_eq!(body["plan"], "free");
    assert_eq!(body["is_premium"], false);
}

#[tokio::test]
async fn test_activate_awaiting_payment_reports_processing() {
    let auth = mock_auth_server("u1").await;
    let app = test_app(None, &auth.url());

    let mut charge = confirmed_charge("ch_wait", Some("u1"), None);
    charge.timeline = vec![TimelineEntry {
        time: None,
        status: "PENDING".to_string(),
    }];
    app.processor.insert(charge).await;

    let response = app
        .router
        .oneshot(activate_request("ch_wait", Some("tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "processing");
}

#[tokio::test]
async fn test_activate_someone_elses_charge_is_forbidden() {
    let auth = mock_auth_server("u2").await;
    let app = test_app(None, &auth.url());
    app.processor
        .insert(confirmed_charge("ch_1", Some("u1"), None))
        .await;

    let response = app
        .router
        .oneshot(activate_request("ch_1", Some("tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.store.find_user("u2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_activate_stale_charge_is_rejected() {
    let auth = mock_auth_server("u1").await;
    let app = test_app(None, &auth.url());

    let mut charge = confirmed_charge("ch_old", Some("u1"), None);
    charge.created_at = OffsetDateTime::now_utc() - Duration::minutes(45);
    app.processor.insert(charge).await;

    let response = app
        .router
        .oneshot(activate_request("ch_old", Some("tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_activate_unknown_charge_is_404() {
    let auth = mock_auth_server("u1").await;
    let app = test_app(None, &auth.url());

    let response = app
        .router
        .oneshot(activate_request("ch_ghost", Some("tok")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_entitlement_defaults_to_free_for_unknown_user() {
    let auth = mock_auth_server("u_new").await;
    let app = test_app(None, &auth.url());

    let response = app
        .router
        .oneshot(authed_request("GET", "/payments/entitlement", "tok"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["plan"], "free");
    assert_eq!(body["is_premium"], false);
}
