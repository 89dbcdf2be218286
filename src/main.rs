mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::delete, routing::get, routing::patch, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{
    ledger::LedgerClient,
    proxy_pool::ProxyPool,
    queue::JobQueue,
    verify_client::HttpVerifyClient,
    weights::{WeightParams, WeightTable},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing enroll-verify API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_histogram!(
        "verification_job_seconds",
        "Time to drive a verification job to a terminal status"
    );
    metrics::describe_counter!("verification_jobs_total", "Total verification jobs claimed");
    metrics::describe_counter!(
        "verification_jobs_succeeded",
        "Verification jobs settled as success"
    );
    metrics::describe_counter!(
        "verification_jobs_failed",
        "Verification jobs settled as failed"
    );
    metrics::describe_counter!(
        "verification_jobs_review",
        "Verification jobs settled as manual review"
    );
    metrics::describe_counter!(
        "proxy_acquire_exhausted_total",
        "Acquire attempts that found no active proxy of the required role"
    );
    metrics::describe_gauge!(
        "verification_queue_depth",
        "Current number of pending jobs in the queue"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis job queue
    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    // Load the proxy pool and organization counters
    tracing::info!("Loading proxy pool");
    let proxies = ProxyPool::load(&db_pool)
        .await
        .expect("Failed to load proxy pool");

    tracing::info!("Loading organization weighting table");
    let weights = WeightTable::new(WeightParams::from_config(&config));
    weights
        .load(&db_pool)
        .await
        .expect("Failed to load organization stats");

    // External service client and ledger boundary
    let verifier = HttpVerifyClient::new(Duration::from_secs(config.phase_timeout_secs));
    let ledger =
        LedgerClient::from_config(config.ledger_url.as_deref()).expect("Failed to initialize ledger client");

    let bind_addr = config.bind_addr.clone();

    // Create shared application state
    let state = AppState::new(db_pool, queue, proxies, weights, verifier, ledger, config);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        // Jobs
        .route(
            "/api/v1/jobs",
            post(routes::jobs::submit_job).get(routes::jobs::list_jobs),
        )
        .route("/api/v1/jobs/check", post(routes::jobs::check_link))
        .route(
            "/api/v1/jobs/{job_id}",
            get(routes::jobs::get_job).delete(routes::jobs::delete_job),
        )
        .route("/api/v1/jobs/{job_id}/logs", get(routes::jobs::job_logs))
        .route(
            "/api/v1/jobs/{job_id}/document",
            get(routes::jobs::job_document),
        )
        // Organizations
        .route(
            "/api/v1/organizations",
            get(routes::orgs::list_organizations),
        )
        // Proxies
        .route(
            "/api/v1/proxies",
            get(routes::proxies::list_proxies).post(routes::proxies::create_proxy),
        )
        .route("/api/v1/proxies/import", post(routes::proxies::import_proxies))
        .route("/api/v1/proxies/bulk", post(routes::proxies::bulk_proxies))
        .route(
            "/api/v1/proxies/{id}",
            patch(routes::proxies::update_proxy).delete(routes::proxies::delete_proxy),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024)); // 2 MB limit

    tracing::info!("Starting enroll-verify on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
