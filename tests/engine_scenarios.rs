//! Engine scenario tests against a scripted verification service.
//!
//! These exercise the full step state machine (claim, warmup, weight check,
//! submit, settle, counters) with the external protocol mocked out. They
//! require a running PostgreSQL instance configured via environment
//! variables.
//!
//! Run with: cargo test --test engine_scenarios -- --ignored

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use enroll_verify::{
    config::AppConfig,
    db::{self, org_queries, queries},
    models::job::JobStatus,
    models::org::Outcome,
    models::proxy::{ProxyIdentity, ProxyRole},
    models::subject::SubjectAttributes,
    services::{
        engine::JobEngine,
        ledger::LedgerClient,
        link::VerificationLink,
        proxy_pool::ProxyPool,
        queue::QueuedJob,
        verify_client::{SubmitOutcome, VerificationService, VerifyError, WarmupSession},
        weights::{WeightParams, WeightTable},
    },
};

/// Scripted stand-in for the external service.
struct ScriptedService {
    organization: String,
    outcome: SubmitOutcome,
}

impl VerificationService for ScriptedService {
    async fn establish_session(
        &self,
        _proxy: &ProxyIdentity,
        _link: &VerificationLink,
    ) -> Result<WarmupSession, VerifyError> {
        Ok(WarmupSession {
            cookies: "sid=scripted".to_string(),
            csrf_token: "tok-scripted".to_string(),
            current_step: "collectPersonalInfo".to_string(),
            organization_name: self.organization.clone(),
        })
    }

    async fn submit_subject(
        &self,
        _proxy: &ProxyIdentity,
        _link: &VerificationLink,
        _session: &WarmupSession,
        _subject: &SubjectAttributes,
    ) -> Result<SubmitOutcome, VerifyError> {
        Ok(self.outcome.clone())
    }

    async fn probe_step(
        &self,
        _proxy: Option<&ProxyIdentity>,
        _link: &VerificationLink,
    ) -> Result<String, VerifyError> {
        Ok("collectPersonalInfo".to_string())
    }
}

/// Test config: real database, delays shrunk so the state machine runs in
/// milliseconds.
fn test_config() -> AppConfig {
    let mut config = AppConfig::from_env().expect("Failed to load config");
    config.verify_domain = "verify.example.com".to_string();
    config.step_delay_min_ms = 1;
    config.step_delay_max_ms = 2;
    config.proxy_retry_delay_ms = 5;
    config.warmup_attempts = 2;
    config.submit_attempts = 2;
    config
}

fn proxy(role: ProxyRole) -> ProxyIdentity {
    ProxyIdentity {
        id: Uuid::new_v4(),
        url: format!("http://{}.egress.test:8080", Uuid::new_v4().simple()),
        label: Some(format!("test-{role}")),
        role,
        is_active: true,
        created_at: Utc::now(),
    }
}

async fn setup(
    organization: &str,
    outcome: SubmitOutcome,
    roles: &[ProxyRole],
) -> (PgPool, JobEngine<ScriptedService>, Arc<WeightTable>) {
    let config = test_config();

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool).await.expect("Failed to run migrations");

    let proxies = ProxyPool::new();
    for role in roles {
        proxies.upsert_local(proxy(*role));
    }

    let weights = Arc::new(WeightTable::new(WeightParams::from_config(&config)));
    let ledger = Arc::new(LedgerClient::from_config(None).expect("ledger"));
    let service = Arc::new(ScriptedService {
        organization: organization.to_string(),
        outcome,
    });

    let engine = JobEngine::new(
        db_pool.clone(),
        Arc::new(proxies),
        Arc::clone(&weights),
        ledger,
        service,
        Arc::new(config),
    );

    (db_pool, engine, weights)
}

async fn create_queued_job(db_pool: &PgPool) -> QueuedJob {
    let session_ref = Uuid::new_v4().simple().to_string();
    let url = format!("https://verify.example.com/verify/{session_ref}");
    let job = queries::create_job(db_pool, &session_ref, &url, None)
        .await
        .expect("Failed to create job");

    QueuedJob {
        job_id: job.id,
        url,
        verification_ref: session_ref,
        caller_id: None,
    }
}

async fn stat_for(db_pool: &PgPool, name: &str) -> (i64, i64, i64, i64) {
    org_queries::list_stats(db_pool)
        .await
        .expect("Failed to list stats")
        .into_iter()
        .find(|row| row.name == name)
        .map(|row| (row.attempts, row.successes, row.failures, row.fraud_rejects))
        .unwrap_or((0, 0, 0, 0))
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_success_scenario_attaches_document_and_counts() {
    let org = format!("Alpha College {}", Uuid::new_v4().simple());
    let (db_pool, engine, _) = setup(
        &org,
        SubmitOutcome::Verified {
            redirect_url: "https://rewards.example/claim/abc".to_string(),
        },
        &[ProxyRole::Warmup, ProxyRole::Submit],
    )
    .await;

    let queued = create_queued_job(&db_pool).await;
    engine.process(&queued).await;

    let job = queries::get_job(&db_pool, queued.job_id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.organization_name.as_deref(), Some(org.as_str()));
    assert_eq!(
        job.redirect_url.as_deref(),
        Some("https://rewards.example/claim/abc")
    );
    assert!(job.has_document);
    assert!(job.subject_name.is_some());
    assert!(job.settled_at.is_some());

    // Document artifact is a self-contained SVG bound to the job.
    let svg = queries::get_document(&db_pool, queued.job_id)
        .await
        .expect("Failed to get document")
        .expect("No document attached");
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains(&org));

    // Exactly one settlement: attempts and successes moved together.
    let (attempts, successes, failures, fraud) = stat_for(&db_pool, &org).await;
    assert_eq!((attempts, successes, failures, fraud), (1, 1, 0, 0));

    // The log stream records every phase in chronological order.
    let logs = queries::logs_for_job(&db_pool, queued.job_id)
        .await
        .expect("Failed to get logs");
    assert!(logs.len() >= 4);
    assert!(logs.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_submit_pool_empty_settles_proxy_exhausted() {
    let org = format!("Beta Institute {}", Uuid::new_v4().simple());
    let (db_pool, engine, _) = setup(
        &org,
        SubmitOutcome::Verified {
            redirect_url: "https://unused.example".to_string(),
        },
        // No submit-role identity in the pool.
        &[ProxyRole::Warmup],
    )
    .await;

    let queued = create_queued_job(&db_pool).await;
    engine.process(&queued).await;

    let job = queries::get_job(&db_pool, queued.job_id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_class.as_deref(), Some("proxy-exhausted"));
    assert!(!job.has_document);

    let (attempts, successes, _, _) = stat_for(&db_pool, &org).await;
    assert_eq!(attempts, 1);
    assert_eq!(successes, 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_fraud_signal_counts_and_penalizes_harder() {
    let fraud_org = format!("Gamma University {}", Uuid::new_v4().simple());
    let (db_pool, engine, weights) = setup(
        &fraud_org,
        SubmitOutcome::FraudFlagged {
            reason: "automation suspected".to_string(),
        },
        &[ProxyRole::Warmup, ProxyRole::Submit],
    )
    .await;

    // Both organizations carry identical history before the decisive job.
    let reject_org = format!("Delta Polytechnic {}", Uuid::new_v4().simple());
    for i in 0..9 {
        let outcome = if i < 6 { Outcome::Success } else { Outcome::Failure };
        weights
            .record(&db_pool, &fraud_org, outcome)
            .await
            .expect("record");
        weights
            .record(&db_pool, &reject_org, outcome)
            .await
            .expect("record");
    }

    let queued = create_queued_job(&db_pool).await;
    engine.process(&queued).await;

    let job = queries::get_job(&db_pool, queued.job_id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_class.as_deref(), Some("fraud-detected"));
    assert_eq!(
        job.error_message.as_deref(),
        Some("anti-automation defenses flagged the attempt: automation suspected")
    );

    let (attempts, _, _, fraud) = stat_for(&db_pool, &fraud_org).await;
    assert_eq!(attempts, 10);
    assert_eq!(fraud, 1);

    // The counterfactual: the same history settled as an ordinary failure.
    weights
        .record(&db_pool, &reject_org, Outcome::Failure)
        .await
        .expect("record");
    assert!(weights.weight_for(&fraud_org) < weights.weight_for(&reject_org));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_settled_job_never_reprocessed() {
    let org = format!("Epsilon College {}", Uuid::new_v4().simple());
    let (db_pool, engine, _) = setup(
        &org,
        SubmitOutcome::Verified {
            redirect_url: "https://rewards.example/claim/xyz".to_string(),
        },
        &[ProxyRole::Warmup, ProxyRole::Submit],
    )
    .await;

    let queued = create_queued_job(&db_pool).await;
    engine.process(&queued).await;
    // A redelivered queue payload must not move the job out of its terminal
    // state or double-count the settlement.
    engine.process(&queued).await;

    let job = queries::get_job(&db_pool, queued.job_id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(job.status, JobStatus::Success);

    let (attempts, successes, _, _) = stat_for(&db_pool, &org).await;
    assert_eq!((attempts, successes), (1, 1));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_review_outcome_is_terminal_and_distinct() {
    let org = format!("Zeta Academy {}", Uuid::new_v4().simple());
    let (db_pool, engine, _) = setup(
        &org,
        SubmitOutcome::ManualReview {
            redirect_url: Some("https://verify.example.com/manual/123".to_string()),
        },
        &[ProxyRole::Warmup, ProxyRole::Submit],
    )
    .await;

    let queued = create_queued_job(&db_pool).await;
    engine.process(&queued).await;

    let job = queries::get_job(&db_pool, queued.job_id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");

    assert_eq!(job.status, JobStatus::Review);
    assert!(job.error_class.is_none());
    assert!(!job.has_document);
    assert_eq!(
        job.redirect_url.as_deref(),
        Some("https://verify.example.com/manual/123")
    );
}
