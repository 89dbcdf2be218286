use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Settlement outcome fed into the per-organization counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    FraudReject,
}

/// Per-organization outcome counters as stored in Postgres.
///
/// `success_rate` and `adjusted_weight` are derived on read and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationStat {
    pub name: String,
    pub attempts: i64,
    pub successes: i64,
    pub failures: i64,
    pub fraud_rejects: i64,
    pub success_rate: f64,
    pub adjusted_weight: f64,
    pub updated_at: DateTime<Utc>,
}
