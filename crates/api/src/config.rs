//! Server configuration from environment variables

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Commerce processor API key for charge lookups
    pub commerce_api_key: String,
    pub commerce_api_base: String,
    /// Webhook shared secret. None means signatures are NOT verified;
    /// tolerated for bring-up, never acceptable in production.
    pub commerce_webhook_secret: Option<String>,
    /// Auth provider base URL for session token verification
    pub auth_api_url: String,
    /// Auth provider publishable key sent alongside user tokens
    pub auth_anon_key: String,
    /// Comma-separated CORS origin allowlist
    pub allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let commerce_api_key = std::env::var("COMMERCE_API_KEY").unwrap_or_default();
        if commerce_api_key.is_empty() {
            tracing::warn!("COMMERCE_API_KEY not set - charge lookups will be rejected upstream");
        }

        let commerce_api_base = std::env::var("COMMERCE_API_BASE")
            .unwrap_or_else(|_| threadflow_payments::processor::DEFAULT_API_BASE.to_string());

        let commerce_webhook_secret = std::env::var("COMMERCE_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let auth_api_url = std::env::var("AUTH_API_URL").unwrap_or_default();
        if auth_api_url.is_empty() {
            tracing::warn!("AUTH_API_URL not set - authenticated endpoints will reject all tokens");
        }
        let auth_anon_key = std::env::var("AUTH_ANON_KEY").unwrap_or_default();

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());

        Ok(Self {
            database_url,
            bind_address,
            commerce_api_key,
            commerce_api_base,
            commerce_webhook_secret,
            auth_api_url,
            auth_anon_key,
            allowed_origins,
        })
    }
}
