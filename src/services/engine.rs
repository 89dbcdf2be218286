//! The per-job step state machine.
//!
//! Drives one verification job from `running` to a terminal status: validate
//! the link, establish a session through a warmup proxy, consult the
//! organization weight, submit the synthesized subject through a distinct
//! submit proxy, interpret the outcome, render the document artifact on
//! success, and settle. Every phase transition appends to the job's
//! persisted log stream; every external call is bounded by a timeout; the
//! engine checks for operator cancellation at each suspension point and
//! abandons a deleted job without writing to it again.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::queries;
use crate::models::job::{ErrorClass, JobStatus, LogLevel};
use crate::models::org::Outcome;
use crate::models::proxy::{ProxyIdentity, ProxyRole};
use crate::models::subject::SubjectAttributes;
use crate::services::document::{self, DocumentArtifact, RenderRequest};
use crate::services::identity;
use crate::services::ledger::LedgerClient;
use crate::services::link::{self, LinkError, VerificationLink};
use crate::services::proxy_pool::ProxyPool;
use crate::services::queue::QueuedJob;
use crate::services::verify_client::{SubmitOutcome, VerificationService, WarmupSession};
use crate::services::weights::WeightTable;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("verification link is not valid: {0}")]
    InvalidLink(#[from] LinkError),

    #[error("no active {0} proxy available after bounded retries")]
    ProxyExhausted(ProxyRole),

    #[error("external call exceeded the phase timeout")]
    NetworkTimeout,

    #[error("verification service rejected the attempt: {0}")]
    ExternalRejection(String),

    #[error("anti-automation defenses flagged the attempt: {0}")]
    FraudDetected(String),

    /// The job record disappeared or left `running` underneath us; abandon
    /// without further writes.
    #[error("job was cancelled")]
    Cancelled,

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidLink(_) => ErrorClass::InvalidLink,
            EngineError::ProxyExhausted(_) => ErrorClass::ProxyExhausted,
            EngineError::NetworkTimeout => ErrorClass::NetworkTimeout,
            EngineError::ExternalRejection(_) => ErrorClass::ExternalRejection,
            EngineError::FraudDetected(_) => ErrorClass::FraudDetected,
            EngineError::Cancelled | EngineError::Db(_) | EngineError::Internal(_) => {
                ErrorClass::InternalError
            }
        }
    }
}

/// Per-run scratch state: what has been resolved and which leases are held.
#[derive(Default)]
struct JobRun {
    organization: Option<String>,
    warmup_proxy: Option<Uuid>,
    submit_proxy: Option<Uuid>,
}

/// Non-failure terminal results of the drive phase.
enum Settled {
    Success {
        redirect_url: String,
        artifact: DocumentArtifact,
    },
    Review {
        redirect_url: Option<String>,
    },
}

/// The job engine. Generic over the external-protocol seam so scenario tests
/// can script the service.
pub struct JobEngine<S> {
    db: PgPool,
    proxies: Arc<ProxyPool>,
    weights: Arc<WeightTable>,
    ledger: Arc<LedgerClient>,
    service: Arc<S>,
    config: Arc<AppConfig>,
}

impl<S> Clone for JobEngine<S> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            proxies: Arc::clone(&self.proxies),
            weights: Arc::clone(&self.weights),
            ledger: Arc::clone(&self.ledger),
            service: Arc::clone(&self.service),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: VerificationService> JobEngine<S> {
    pub fn new(
        db: PgPool,
        proxies: Arc<ProxyPool>,
        weights: Arc<WeightTable>,
        ledger: Arc<LedgerClient>,
        service: Arc<S>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            proxies,
            weights,
            ledger,
            service,
            config,
        }
    }

    /// Claim a queued job and drive it to a terminal status. Never returns an
    /// error: whatever happens is settled into the job record (or, for a
    /// cancelled job, deliberately not).
    pub async fn process(&self, queued: &QueuedJob) {
        match queries::claim_job(&self.db, queued.job_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(job_id = %queued.job_id, "job gone or already claimed, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %queued.job_id, error = %e, "failed to claim job");
                return;
            }
        }

        metrics::counter!("verification_jobs_total").increment(1);
        let started = std::time::Instant::now();

        let mut run = JobRun::default();
        let result = self.drive(queued, &mut run).await;

        // Leases are held until settlement regardless of outcome.
        if let Some(id) = run.warmup_proxy.take() {
            self.proxies.release(id);
        }
        if let Some(id) = run.submit_proxy.take() {
            self.proxies.release(id);
        }

        match result {
            Ok(settled) => self.settle_ok(queued, &run, settled).await,
            Err(EngineError::Cancelled) => {
                tracing::info!(job_id = %queued.job_id, "job cancelled mid-run, abandoning");
            }
            Err(e) => self.settle_err(queued, &run, e).await,
        }

        metrics::histogram!("verification_job_seconds").record(started.elapsed().as_secs_f64());
    }

    async fn drive(&self, queued: &QueuedJob, run: &mut JobRun) -> Result<Settled, EngineError> {
        let job_id = queued.job_id;

        // Re-validate before touching the network; the config may have
        // changed since submission.
        let link = link::parse_verification_link(&queued.url, &self.config.verify_domain)?;
        self.log(job_id, LogLevel::Info, "verification link validated").await?;

        let job = queries::get_job(&self.db, job_id)
            .await?
            .ok_or(EngineError::Cancelled)?;
        let valid_through = (job.created_at + chrono::Duration::days(365)).date_naive();

        // Warmup: session establishment through a warmup-role egress point.
        let (session, warmup_proxy) = self.warmup_phase(job_id, &link).await?;
        let warmup_url = warmup_proxy.url.clone();
        run.warmup_proxy = Some(warmup_proxy.id);
        self.check_cancelled(job_id).await?;

        // Resolve the organization onto its canonical stat key and derive the
        // subject this job will submit.
        let org = self.weights.canonical(&session.organization_name);
        let subject = identity::synthesize(job_id, &org);
        queries::set_job_context(&self.db, job_id, &org, &subject.full_name(), &subject.email)
            .await?;
        run.organization = Some(org.clone());
        self.log(
            job_id,
            LogLevel::Info,
            &format!(
                "session established for '{org}' at step '{}'",
                session.current_step
            ),
        )
        .await?;

        // Weight check: advisory, logged, never an abort.
        let weight = self.weights.weight_for(&org);
        let deprioritized = weight < self.config.weight_floor;
        self.log(
            job_id,
            LogLevel::Info,
            &format!("organization '{org}' adjusted weight {weight:.3}"),
        )
        .await?;
        if deprioritized {
            self.log(
                job_id,
                LogLevel::Warning,
                "adjusted weight below floor, deprioritizing with widened step delays",
            )
            .await?;
        }

        self.step_delay(deprioritized).await;
        self.check_cancelled(job_id).await?;

        // Submit through a distinct submit-role egress point.
        let (outcome, submit_proxy) = self
            .submit_phase(job_id, &link, &session, &subject, &warmup_url, deprioritized)
            .await?;
        run.submit_proxy = Some(submit_proxy);
        self.check_cancelled(job_id).await?;

        match outcome {
            SubmitOutcome::Verified { redirect_url } => {
                self.log(
                    job_id,
                    LogLevel::Info,
                    "service confirmed verification, rendering document artifact",
                )
                .await?;

                let request = RenderRequest {
                    job_id,
                    subject: &subject,
                    organization: &org,
                    valid_through,
                    photo: None,
                };
                let artifact = document::render(&request)
                    .map_err(|e| EngineError::Internal(format!("document synthesis: {e}")))?;

                Ok(Settled::Success {
                    redirect_url,
                    artifact,
                })
            }
            SubmitOutcome::Rejected { reason } => Err(EngineError::ExternalRejection(reason)),
            SubmitOutcome::FraudFlagged { reason } => Err(EngineError::FraudDetected(reason)),
            SubmitOutcome::ManualReview { redirect_url } => Ok(Settled::Review { redirect_url }),
        }
    }

    /// Warmup phase: bounded attempts, fresh proxy each time, transport
    /// failures deactivate the identity they burned.
    async fn warmup_phase(
        &self,
        job_id: Uuid,
        link: &VerificationLink,
    ) -> Result<(WarmupSession, ProxyIdentity), EngineError> {
        let attempts = self.config.warmup_attempts.max(1);
        let mut last_failure: Option<EngineError> = None;

        for attempt in 1..=attempts {
            self.check_cancelled(job_id).await?;

            let Some(proxy) = self.proxies.acquire(ProxyRole::Warmup) else {
                metrics::counter!("proxy_acquire_exhausted_total").increment(1);
                self.log(
                    job_id,
                    LogLevel::Warning,
                    &format!("no active warmup proxy (attempt {attempt}/{attempts})"),
                )
                .await?;
                sleep(Duration::from_millis(self.config.proxy_retry_delay_ms)).await;
                continue;
            };

            self.log(
                job_id,
                LogLevel::Info,
                &format!(
                    "warmup via proxy {} (attempt {attempt}/{attempts})",
                    proxy.label.as_deref().unwrap_or("unlabeled")
                ),
            )
            .await?;

            match timeout(
                self.phase_timeout(),
                self.service.establish_session(&proxy, link),
            )
            .await
            {
                Ok(Ok(session)) => return Ok((session, proxy)),
                Ok(Err(e)) if e.is_transport() => {
                    self.log(
                        job_id,
                        LogLevel::Warning,
                        &format!("warmup transport failure, deactivating proxy: {e}"),
                    )
                    .await?;
                    self.proxies.mark_dead(&self.db, proxy.id).await?;
                    self.proxies.release(proxy.id);
                    last_failure = Some(EngineError::NetworkTimeout);
                }
                Ok(Err(e)) => {
                    self.log(job_id, LogLevel::Warning, &format!("warmup failed: {e}"))
                        .await?;
                    self.proxies.release(proxy.id);
                    last_failure = Some(EngineError::ExternalRejection(e.to_string()));
                }
                Err(_) => {
                    self.log(
                        job_id,
                        LogLevel::Warning,
                        &format!("warmup timed out after {}s", self.config.phase_timeout_secs),
                    )
                    .await?;
                    self.proxies.release(proxy.id);
                    last_failure = Some(EngineError::NetworkTimeout);
                }
            }

            self.step_delay(false).await;
        }

        Err(last_failure.unwrap_or(EngineError::ProxyExhausted(ProxyRole::Warmup)))
    }

    /// Submit phase: bounded attempts through a submit-role proxy distinct
    /// from the warmup egress point whenever an alternative exists.
    async fn submit_phase(
        &self,
        job_id: Uuid,
        link: &VerificationLink,
        session: &WarmupSession,
        subject: &SubjectAttributes,
        warmup_url: &str,
        deprioritized: bool,
    ) -> Result<(SubmitOutcome, Uuid), EngineError> {
        let attempts = self.config.submit_attempts.max(1);
        let mut last_failure: Option<EngineError> = None;

        for attempt in 1..=attempts {
            self.check_cancelled(job_id).await?;

            let Some(proxy) = self
                .proxies
                .acquire_excluding(ProxyRole::Submit, Some(warmup_url))
            else {
                metrics::counter!("proxy_acquire_exhausted_total").increment(1);
                self.log(
                    job_id,
                    LogLevel::Warning,
                    &format!("no active submit proxy (attempt {attempt}/{attempts})"),
                )
                .await?;
                sleep(Duration::from_millis(self.config.proxy_retry_delay_ms)).await;
                continue;
            };

            if proxy.url == warmup_url {
                self.log(
                    job_id,
                    LogLevel::Warning,
                    "single submit egress point matches warmup, proceeding with reduced anti-correlation",
                )
                .await?;
            }

            self.log(
                job_id,
                LogLevel::Info,
                &format!(
                    "submitting subject via proxy {} (attempt {attempt}/{attempts})",
                    proxy.label.as_deref().unwrap_or("unlabeled")
                ),
            )
            .await?;

            self.step_delay(deprioritized).await;

            match timeout(
                self.phase_timeout(),
                self.service.submit_subject(&proxy, link, session, subject),
            )
            .await
            {
                Ok(Ok(outcome)) => return Ok((outcome, proxy.id)),
                Ok(Err(e)) if e.is_transport() => {
                    self.log(
                        job_id,
                        LogLevel::Warning,
                        &format!("submit transport failure, deactivating proxy: {e}"),
                    )
                    .await?;
                    self.proxies.mark_dead(&self.db, proxy.id).await?;
                    self.proxies.release(proxy.id);
                    last_failure = Some(EngineError::NetworkTimeout);
                }
                Ok(Err(e)) => {
                    self.log(job_id, LogLevel::Warning, &format!("submit failed: {e}"))
                        .await?;
                    self.proxies.release(proxy.id);
                    last_failure = Some(EngineError::ExternalRejection(e.to_string()));
                }
                Err(_) => {
                    self.log(
                        job_id,
                        LogLevel::Warning,
                        &format!("submit timed out after {}s", self.config.phase_timeout_secs),
                    )
                    .await?;
                    self.proxies.release(proxy.id);
                    last_failure = Some(EngineError::NetworkTimeout);
                }
            }
        }

        Err(last_failure.unwrap_or(EngineError::ProxyExhausted(ProxyRole::Submit)))
    }

    async fn settle_ok(&self, queued: &QueuedJob, run: &JobRun, settled: Settled) {
        let (status, outcome, redirect, svg, message) = match &settled {
            Settled::Success {
                redirect_url,
                artifact,
            } => (
                JobStatus::Success,
                Outcome::Success,
                Some(redirect_url.as_str()),
                Some(artifact.svg.as_str()),
                "verification succeeded, document artifact attached".to_string(),
            ),
            Settled::Review { redirect_url } => (
                JobStatus::Review,
                Outcome::Failure,
                redirect_url.as_deref(),
                None,
                "service response requires manual review".to_string(),
            ),
        };

        self.finalize(queued, run, status, None, None, redirect, svg, LogLevel::Info, &message, outcome)
            .await;
    }

    async fn settle_err(&self, queued: &QueuedJob, run: &JobRun, error: EngineError) {
        let class = error.class();
        let message = error.to_string();
        let outcome = match class {
            ErrorClass::FraudDetected => Outcome::FraudReject,
            _ => Outcome::Failure,
        };

        self.finalize(
            queued,
            run,
            JobStatus::Failed,
            Some(class),
            Some(&message),
            None,
            None,
            LogLevel::Error,
            &message,
            outcome,
        )
        .await;
    }

    /// Write the terminal status (guarded, exactly-once), the final log
    /// entry, the weighting-table outcome and the ledger debit. Errors here
    /// are logged and swallowed: settlement must never panic a worker.
    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        queued: &QueuedJob,
        run: &JobRun,
        status: JobStatus,
        class: Option<ErrorClass>,
        error_message: Option<&str>,
        redirect: Option<&str>,
        svg: Option<&str>,
        level: LogLevel,
        message: &str,
        outcome: Outcome,
    ) {
        let job_id = queued.job_id;

        let transitioned = match queries::settle_job(
            &self.db, job_id, status, class, error_message, redirect, svg,
        )
        .await
        {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "failed to settle job");
                return;
            }
        };

        if !transitioned {
            // Deleted or already terminal: nothing more belongs to us.
            tracing::info!(job_id = %job_id, "job not settleable, skipping side effects");
            return;
        }

        if let Err(e) = queries::append_log(&self.db, job_id, level, message).await {
            tracing::error!(job_id = %job_id, error = %e, "failed to append final log entry");
        }

        // Counters update exactly once per job: gated on the transition above.
        if let Some(org) = &run.organization {
            if let Err(e) = self.weights.record(&self.db, org, outcome).await {
                tracing::error!(job_id = %job_id, error = %e, "failed to record organization outcome");
            }
        }

        if let Some(caller) = queued.caller_id.as_deref() {
            if let Err(e) = self.ledger.debit(caller, job_id).await {
                tracing::error!(job_id = %job_id, error = %e, "ledger debit failed");
            }
        }

        match status {
            JobStatus::Success => {
                metrics::counter!("verification_jobs_succeeded").increment(1)
            }
            JobStatus::Review => metrics::counter!("verification_jobs_review").increment(1),
            _ => metrics::counter!("verification_jobs_failed").increment(1),
        }

        tracing::info!(
            job_id = %job_id,
            status = %status,
            organization = run.organization.as_deref().unwrap_or("unresolved"),
            "job settled"
        );
    }

    /// Cancellation probe, called at every suspension point. A deleted job
    /// (or one forced out of `running` by an operator) is abandoned.
    async fn check_cancelled(&self, job_id: Uuid) -> Result<(), EngineError> {
        match queries::job_status(&self.db, job_id).await? {
            Some(JobStatus::Running) => Ok(()),
            _ => Err(EngineError::Cancelled),
        }
    }

    /// Human-plausible randomized pause between protocol steps. Sampled per
    /// step from the configured band; deprioritized organizations get a
    /// doubled band.
    async fn step_delay(&self, deprioritized: bool) {
        let min = self.config.step_delay_min_ms;
        let max = self.config.step_delay_max_ms.max(min + 1);
        let ms = {
            use rand::Rng;
            let mut rng = rand::rng();
            rng.random_range(min..=max)
        };
        let factor = if deprioritized { 2 } else { 1 };
        sleep(Duration::from_millis(ms * factor)).await;
    }

    fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.config.phase_timeout_secs)
    }

    /// Append to the job's persisted log stream, mirroring to process
    /// diagnostics.
    async fn log(&self, job_id: Uuid, level: LogLevel, message: &str) -> Result<(), EngineError> {
        tracing::debug!(job_id = %job_id, level = %level, "{message}");
        queries::append_log(&self.db, job_id, level, message).await?;
        Ok(())
    }
}
