// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Auth middleware tests against a mock auth provider

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{middleware, routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::middleware::{auth_middleware, new_token_cache, AuthState, AuthUser};

async fn whoami(Extension(user): Extension<AuthUser>) -> Json<Value> {
    Json(json!({ "user": user.user_id, "email": user.email }))
}

fn router_for(auth_api_url: &str) -> Router {
    let auth = AuthState {
        auth_api_url: auth_api_url.to_string(),
        auth_anon_key: "anon-key".to_string(),
        http_client: reqwest::Client::new(),
        token_cache: new_token_cache(),
    };
    Router::new()
        .route("/whoami", get(whoami))
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
}

fn get_whoami(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri("/whoami");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let router = router_for("http://127.0.0.1:1/unused");
    let response = router.oneshot(get_whoami(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_valid_token_resolves_user() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/user")
        .match_header("authorization", "Bearer tok_good")
        .with_status(200)
        .with_body(r#"{"id":"u1","email":"u1@example.com"}"#)
        .create_async()
        .await;

    let router = router_for(&server.url());
    let response = router.oneshot(get_whoami(Some("tok_good"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["user"], "u1");
}

#[tokio::test]
async fn test_rejected_token_is_unauthorized() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/user")
        .with_status(401)
        .with_body(r#"{"error":"invalid token"}"#)
        .create_async()
        .await;

    let router = router_for(&server.url());
    let response = router.oneshot(get_whoami(Some("tok_bad"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_verification_result_is_cached() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/user")
        .with_status(200)
        .with_body(r#"{"id":"u1","email":null}"#)
        .expect(1)
        .create_async()
        .await;

    let router = router_for(&server.url());
    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(get_whoami(Some("tok_cached")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    mock.assert_async().await;
}
