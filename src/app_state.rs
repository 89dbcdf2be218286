use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    ledger::LedgerClient,
    proxy_pool::ProxyPool,
    queue::JobQueue,
    verify_client::HttpVerifyClient,
    weights::WeightTable,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<JobQueue>,
    pub proxies: Arc<ProxyPool>,
    pub weights: Arc<WeightTable>,
    pub verifier: Arc<HttpVerifyClient>,
    pub ledger: Arc<LedgerClient>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        queue: JobQueue,
        proxies: ProxyPool,
        weights: WeightTable,
        verifier: HttpVerifyClient,
        ledger: LedgerClient,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
            proxies: Arc::new(proxies),
            weights: Arc::new(weights),
            verifier: Arc::new(verifier),
            ledger: Arc::new(ledger),
            config: Arc::new(config),
        }
    }
}
