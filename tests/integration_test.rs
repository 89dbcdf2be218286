use enroll_verify::{
    config::AppConfig,
    db::{self, proxy_queries, queries},
    models::job::{ErrorClass, JobStatus, LogLevel},
    models::proxy::ProxyRole,
    services::link::parse_verification_link,
    services::proxy_pool::ProxyPool,
    services::queue::{JobQueue, QueuedJob},
    services::weights::{adjusted_weight, WeightParams},
};
use uuid::Uuid;

/// Integration test: persistence and queue round-trip
///
/// This test verifies the infrastructure integration:
/// 1. Database connection and migrations
/// 2. Job lifecycle queries (create/claim/settle/logs) and their guards
/// 3. Proxy persistence, bulk import and pool loading
/// 4. Job queue (enqueue/dequeue/complete)
///
/// Note: This requires a running PostgreSQL and Redis instance
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_full_integration() {
    // Load config from environment
    let config = AppConfig::from_env().expect("Failed to load config");

    // Initialize database
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize queue");

    // 1. Create a job and walk it through its lifecycle
    let session_ref = Uuid::new_v4().simple().to_string();
    let url = format!("https://verify.example.com/verify/{session_ref}");
    let job = queries::create_job(&db_pool, &session_ref, &url, Some("test-caller"))
        .await
        .expect("Failed to create job");

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.verification_ref, session_ref);
    assert!(!job.has_document);

    // 2. One live job per verification session
    let duplicate = queries::create_job(&db_pool, &session_ref, &url, None).await;
    assert!(matches!(&duplicate, Err(e) if queries::is_duplicate_live_job(e)));

    // 3. Claim is exactly-once
    assert!(queries::claim_job(&db_pool, job.id).await.expect("claim"));
    assert!(!queries::claim_job(&db_pool, job.id).await.expect("claim"));
    assert_eq!(
        queries::job_status(&db_pool, job.id).await.expect("status"),
        Some(JobStatus::Running)
    );

    // 4. Log stream is chronological
    queries::append_log(&db_pool, job.id, LogLevel::Info, "first")
        .await
        .expect("log");
    queries::append_log(&db_pool, job.id, LogLevel::Warning, "second")
        .await
        .expect("log");
    let logs = queries::logs_for_job(&db_pool, job.id).await.expect("logs");
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].message, "first");
    assert_eq!(logs[1].level, LogLevel::Warning);

    // 5. Settle is guarded and exactly-once
    let settled = queries::settle_job(
        &db_pool,
        job.id,
        JobStatus::Failed,
        Some(ErrorClass::ExternalRejection),
        Some("service said no"),
        None,
        None,
    )
    .await
    .expect("settle");
    assert!(settled);

    let settled_again = queries::settle_job(
        &db_pool,
        job.id,
        JobStatus::Success,
        None,
        None,
        None,
        None,
    )
    .await
    .expect("settle");
    assert!(!settled_again, "terminal job must not transition again");

    let reloaded = queries::get_job(&db_pool, job.id)
        .await
        .expect("get")
        .expect("job");
    assert_eq!(reloaded.status, JobStatus::Failed);
    assert_eq!(reloaded.error_class.as_deref(), Some("external-rejection"));

    // 6. Proxy persistence + pool loading + import dedupe
    let unique = Uuid::new_v4().simple().to_string();
    let lines = vec![
        format!("{unique}.egress.test:9100"),
        format!("{unique}.egress.test:9100"), // in-batch duplicate
        format!("http://user:pass@{unique}.egress.test:9101"),
    ];
    let pool = ProxyPool::load(&db_pool).await.expect("load pool");
    let added = pool
        .bulk_import(&db_pool, &lines, ProxyRole::Submit)
        .await
        .expect("import");
    assert_eq!(added, 2);

    let acquired = pool.acquire(ProxyRole::Submit).expect("acquire");
    pool.mark_dead(&db_pool, acquired.id).await.expect("mark dead");
    let all = proxy_queries::list_proxies(&db_pool).await.expect("list");
    let dead = all
        .iter()
        .find(|p| p.id == acquired.id)
        .expect("marked proxy persisted");
    assert!(!dead.is_active, "mark_dead must persist, not delete");
    pool.release(acquired.id);

    // 7. Queue round-trip
    let queued = QueuedJob {
        job_id: job.id,
        url: url.clone(),
        verification_ref: session_ref.clone(),
        caller_id: Some("test-caller".to_string()),
    };
    queue.enqueue(&queued).await.expect("enqueue");
    let dequeued = queue
        .dequeue()
        .await
        .expect("dequeue")
        .expect("job in queue");
    assert_eq!(dequeued.job_id, job.id);
    assert_eq!(dequeued.verification_ref, session_ref);
    queue.complete(&dequeued).await.expect("complete");

    // Cleanup
    assert!(queries::delete_job(&db_pool, job.id).await.expect("delete"));

    println!("✅ All integration tests passed!");
}

/// Link validation is synchronous and happens before any job exists.
#[test]
fn test_link_validation_logic() {
    let ok = parse_verification_link(
        "https://verify.example.com/verify/4dbb9be2c1af4f0d9b1c",
        "verify.example.com",
    );
    assert!(ok.is_ok());

    assert!(parse_verification_link("https://elsewhere.io/verify/4dbb9be2c1af4f0d9b1c", "verify.example.com").is_err());
    assert!(parse_verification_link("https://verify.example.com/", "verify.example.com").is_err());
}

/// A fraud rejection must depress the weight more than an ordinary failure
/// with the same history.
#[test]
fn test_fraud_rejection_outweighs_failure() {
    let params = WeightParams {
        prior: 0.5,
        smoothing: 10.0,
        min_attempts: 5,
        fraud_penalty: 2.0,
    };

    // 10 attempts, 6 successes; the remaining outcomes differ.
    let plain_failures = adjusted_weight(10, 6, 0, params);
    let with_fraud = adjusted_weight(10, 6, 2, params);
    assert!(with_fraud < plain_failures);
}
