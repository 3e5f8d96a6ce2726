//! Authentication middleware for Axum
//!
//! Session tokens are minted by the external auth provider; this
//! middleware resolves "token -> user id" by calling the provider's user
//! endpoint, with a short-lived cache so a dashboard making parallel
//! requests does not hammer the provider's rate limits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

/// Cache verified tokens for 60 seconds
const TOKEN_CACHE_TTL: Duration = Duration::from_secs(60);

/// Bound on cache size so a flood of unique (bogus) tokens cannot grow
/// memory without limit
const MAX_CACHE_ENTRIES: usize = 10_000;

/// Authenticated user resolved from a session token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct CachedAuth {
    user: AuthUser,
    cached_at: Instant,
}

pub(crate) type TokenCache = Arc<RwLock<HashMap<String, CachedAuth>>>;

pub(crate) fn new_token_cache() -> TokenCache {
    Arc::new(RwLock::new(HashMap::new()))
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub auth_api_url: String,
    pub auth_anon_key: String,
    pub http_client: Client,
    pub(crate) token_cache: TokenCache,
}

/// Response from the auth provider's user endpoint
#[derive(Debug, Clone, Deserialize)]
struct ProviderUserResponse {
    id: String,
    email: Option<String>,
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

/// Require a verified session; inserts [`AuthUser`] into request extensions
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(&request) else {
        return unauthorized("missing bearer token");
    };

    match verify_token(&auth, &token).await {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => unauthorized("invalid or expired session token"),
    }
}

async fn verify_token(auth: &AuthState, token: &str) -> Option<AuthUser> {
    {
        let cache = auth.token_cache.read().await;
        if let Some(cached) = cache.get(token) {
            if cached.cached_at.elapsed() < TOKEN_CACHE_TTL {
                return Some(cached.user.clone());
            }
        }
    }

    if auth.auth_api_url.is_empty() {
        return None;
    }

    let url = format!("{}/user", auth.auth_api_url.trim_end_matches('/'));
    let response = auth
        .http_client
        .get(&url)
        .header(AUTHORIZATION, format!("Bearer {}", token))
        .header("apikey", &auth.auth_anon_key)
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .ok()?;

    if !response.status().is_success() {
        tracing::debug!(status = %response.status(), "Token verification rejected");
        return None;
    }

    let provider_user: ProviderUserResponse = response.json().await.ok()?;
    let user = AuthUser {
        user_id: provider_user.id,
        email: provider_user.email,
    };

    let mut cache = auth.token_cache.write().await;
    if cache.len() >= MAX_CACHE_ENTRIES {
        // Bounded cache: drop everything rather than track LRU order
        cache.clear();
    }
    cache.insert(
        token.to_string(),
        CachedAuth {
            user: user.clone(),
            cached_at: Instant::now(),
        },
    );

    Some(user)
}
