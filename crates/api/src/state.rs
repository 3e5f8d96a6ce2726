//! Application state

use std::sync::Arc;

use reqwest::Client;
use sqlx::PgPool;
use threadflow_payments::{
    CommerceClient, CommerceConfig, PaymentStore, PgPaymentStore, ProcessorApi,
    ReconciliationEngine,
};

use crate::auth::middleware::{new_token_cache, TokenCache};
use crate::auth::AuthState;
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub engine: Arc<ReconciliationEngine>,
    pub store: Arc<dyn PaymentStore>,
    pub http_client: Client,
    pub(crate) token_cache: TokenCache,
}

impl AppState {
    /// Production wiring: Postgres store + commerce HTTP client
    pub fn new(pool: PgPool, config: Config) -> Self {
        let store: Arc<dyn PaymentStore> = Arc::new(PgPaymentStore::new(pool));
        let processor: Arc<dyn ProcessorApi> = Arc::new(CommerceClient::new(
            CommerceConfig::new(config.commerce_api_key.clone())
                .with_base_url(config.commerce_api_base.clone()),
        ));
        Self::with_components(config, store, processor)
    }

    /// Explicit wiring; tests pass the in-memory store and processor fake
    pub fn with_components(
        config: Config,
        store: Arc<dyn PaymentStore>,
        processor: Arc<dyn ProcessorApi>,
    ) -> Self {
        if config.commerce_webhook_secret.is_none() {
            tracing::warn!(
                "COMMERCE_WEBHOOK_SECRET not configured - webhook signatures will NOT be \
                 verified. Acceptable for bring-up only; production must set the secret."
            );
        }

        let engine = Arc::new(ReconciliationEngine::new(store.clone(), processor));

        Self {
            config,
            engine,
            store,
            http_client: Client::new(),
            token_cache: new_token_cache(),
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            auth_api_url: self.config.auth_api_url.clone(),
            auth_anon_key: self.config.auth_anon_key.clone(),
            http_client: self.http_client.clone(),
            token_cache: self.token_cache.clone(),
        }
    }
}
