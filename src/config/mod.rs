use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Domain of the external verification service (e.g., "verify.eduveritas.com").
    /// Submitted links must reference this domain or a subdomain of it.
    pub verify_domain: String,

    /// Base URL of the credit ledger collaborator. When unset, submissions are
    /// admitted without balance checks and settlements debit nothing.
    #[serde(default)]
    pub ledger_url: Option<String>,

    /// Maximum verification jobs run concurrently by one worker process.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Bounded attempt counts for the warmup and submit phases.
    #[serde(default = "default_phase_attempts")]
    pub warmup_attempts: u32,
    #[serde(default = "default_phase_attempts")]
    pub submit_attempts: u32,

    /// Upper bound on any single external call.
    #[serde(default = "default_phase_timeout_secs")]
    pub phase_timeout_secs: u64,

    /// Randomized inter-step delay band, in milliseconds. Delays are sampled
    /// per step, never fixed.
    #[serde(default = "default_step_delay_min_ms")]
    pub step_delay_min_ms: u64,
    #[serde(default = "default_step_delay_max_ms")]
    pub step_delay_max_ms: u64,

    /// Pause before retrying when no proxy of the required role is available.
    #[serde(default = "default_proxy_retry_delay_ms")]
    pub proxy_retry_delay_ms: u64,

    /// How often the worker reconciles its in-memory proxy pool with Postgres.
    #[serde(default = "default_proxy_refresh_secs")]
    pub proxy_refresh_secs: u64,

    /// Organization weighting: fixed prior reported below the cold-start
    /// threshold, smoothing constant, cold-start attempt threshold, extra
    /// penalty multiplier for fraud rejections, and the floor under which a
    /// job is deprioritized.
    #[serde(default = "default_weight_prior")]
    pub weight_prior: f64,
    #[serde(default = "default_weight_smoothing")]
    pub weight_smoothing: f64,
    #[serde(default = "default_weight_min_attempts")]
    pub weight_min_attempts: i64,
    #[serde(default = "default_fraud_penalty")]
    pub fraud_penalty: f64,
    #[serde(default = "default_weight_floor")]
    pub weight_floor: f64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_phase_attempts() -> u32 {
    3
}

fn default_phase_timeout_secs() -> u64 {
    30
}

fn default_step_delay_min_ms() -> u64 {
    1500
}

fn default_step_delay_max_ms() -> u64 {
    6000
}

fn default_proxy_retry_delay_ms() -> u64 {
    2000
}

fn default_proxy_refresh_secs() -> u64 {
    30
}

fn default_weight_prior() -> f64 {
    0.5
}

fn default_weight_smoothing() -> f64 {
    10.0
}

fn default_weight_min_attempts() -> i64 {
    5
}

fn default_fraud_penalty() -> f64 {
    2.0
}

fn default_weight_floor() -> f64 {
    0.15
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
