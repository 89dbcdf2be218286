use enroll_verify::{
    config::AppConfig,
    db,
    services::{
        engine::JobEngine,
        ledger::LedgerClient,
        proxy_pool::ProxyPool,
        queue::JobQueue,
        verify_client::HttpVerifyClient,
        weights::{WeightParams, WeightTable},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting verification job worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let queue = Arc::new(JobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

    let proxies = Arc::new(
        ProxyPool::load(&db_pool)
            .await
            .expect("Failed to load proxy pool"),
    );

    let weights = Arc::new(WeightTable::new(WeightParams::from_config(&config)));
    weights
        .load(&db_pool)
        .await
        .expect("Failed to load organization stats");

    let verifier = Arc::new(HttpVerifyClient::new(Duration::from_secs(
        config.phase_timeout_secs,
    )));
    let ledger = Arc::new(
        LedgerClient::from_config(config.ledger_url.as_deref())
            .expect("Failed to initialize ledger client"),
    );

    let config = Arc::new(config);
    let engine = JobEngine::new(
        db_pool.clone(),
        Arc::clone(&proxies),
        Arc::clone(&weights),
        Arc::clone(&ledger),
        verifier,
        Arc::clone(&config),
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
    let proxy_refresh = Duration::from_secs(config.proxy_refresh_secs);

    tracing::info!(
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Worker ready, starting job processing loop"
    );

    // Main processing loop: jobs run concurrently as independent tasks,
    // bounded by the semaphore; the loop itself never blocks on a job.
    loop {
        // Pick up operator proxy changes made through the API process.
        if let Err(e) = proxies.maybe_refresh(&db_pool, proxy_refresh).await {
            tracing::warn!(error = %e, "proxy pool refresh failed");
        }

        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("semaphore closed");

        match queue.dequeue().await {
            Ok(Some(job)) => {
                tracing::info!(job_id = %job.job_id, "dequeued verification job");

                let engine = engine.clone();
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    engine.process(&job).await;

                    if let Err(e) = queue.complete(&job).await {
                        tracing::error!(job_id = %job.job_id, error = %e, "failed to remove job from processing list");
                    }

                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                if let Ok(depth) = queue.queue_depth().await {
                    metrics::gauge!("verification_queue_depth").set(depth as f64);
                }
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "error dequeuing job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}
