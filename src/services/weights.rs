//! Organization weighting table.
//!
//! Maintains adaptive desirability scores per target organization from
//! historical settlement outcomes. Counters persist in Postgres (one atomic
//! upsert per settlement); this table mirrors them in memory so `weight_for`
//! reads never wait on a settlement in flight. Stale-by-one reads are fine:
//! the weight is an advisory signal, not a correctness-critical one.

use std::collections::HashMap;
use std::sync::RwLock;

use sqlx::PgPool;
use strsim::jaro_winkler;

use crate::config::AppConfig;
use crate::db::org_queries;
use crate::models::org::Outcome;

/// Minimum similarity for two organization display names to be treated as
/// the same organization.
const ORG_MATCH_THRESHOLD: f64 = 0.92;

/// Tunables of the smoothing formula. Defaults come from config; the formula
/// itself is documented on [`adjusted_weight`].
#[derive(Debug, Clone, Copy)]
pub struct WeightParams {
    pub prior: f64,
    pub smoothing: f64,
    pub min_attempts: i64,
    pub fraud_penalty: f64,
}

impl WeightParams {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            prior: cfg.weight_prior,
            smoothing: cfg.weight_smoothing,
            min_attempts: cfg.weight_min_attempts,
            fraud_penalty: cfg.fraud_penalty,
        }
    }
}

/// `successes / max(attempts, 1)`.
pub fn success_rate(attempts: i64, successes: i64) -> f64 {
    successes as f64 / attempts.max(1) as f64
}

/// Smoothed desirability score in `[0, 1]`.
///
/// Below `min_attempts` the score is the fixed prior: one or two data points
/// must not swing targeting. Past it, the penalized success rate
/// `max(successes - fraud_penalty * fraud_rejects, 0) / attempts` is blended
/// toward the prior with weight `attempts / (attempts + smoothing)`, so the
/// score converges on observed behavior as evidence accumulates. Fraud
/// rejections subtract more than ordinary failures ever can: a tripped
/// anti-automation defense must suppress future targeting faster than a
/// benign rejection.
pub fn adjusted_weight(attempts: i64, successes: i64, fraud_rejects: i64, p: WeightParams) -> f64 {
    if attempts < p.min_attempts {
        return p.prior;
    }

    let penalized =
        ((successes as f64 - p.fraud_penalty * fraud_rejects as f64) / attempts as f64).max(0.0);
    let blend = attempts as f64 / (attempts as f64 + p.smoothing);

    (p.prior + (penalized - p.prior) * blend).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    attempts: i64,
    successes: i64,
    fraud_rejects: i64,
}

/// In-memory mirror of `organization_stats`, keyed by canonical name.
pub struct WeightTable {
    params: WeightParams,
    counters: RwLock<HashMap<String, Counters>>,
}

impl WeightTable {
    pub fn new(params: WeightParams) -> Self {
        Self {
            params,
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Fill the mirror from Postgres at startup.
    pub async fn load(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        let rows = org_queries::list_stats(pool).await?;
        let mut counters = self.counters.write().expect("weight table lock poisoned");
        counters.clear();
        for row in rows {
            counters.insert(
                row.name,
                Counters {
                    attempts: row.attempts,
                    successes: row.successes,
                    fraud_rejects: row.fraud_rejects,
                },
            );
        }
        Ok(())
    }

    /// Current adjusted weight for an organization. Unknown organizations get
    /// the cold-start prior.
    pub fn weight_for(&self, org: &str) -> f64 {
        let counters = self.counters.read().expect("weight table lock poisoned");
        let c = counters.get(org).copied().unwrap_or_default();
        adjusted_weight(c.attempts, c.successes, c.fraud_rejects, self.params)
    }

    /// Map an external display name onto the canonical stat key, coalescing
    /// near-identical variants ("Alpha College" / "Alpha College (Main)") onto
    /// one row.
    pub fn canonical(&self, display_name: &str) -> String {
        let trimmed = display_name.trim();
        let counters = self.counters.read().expect("weight table lock poisoned");

        let mut best: Option<(&String, f64)> = None;
        for name in counters.keys() {
            let score = jaro_winkler(&name.to_lowercase(), &trimmed.to_lowercase());
            if score >= ORG_MATCH_THRESHOLD && best.is_none_or(|(_, b)| score > b) {
                best = Some((name, score));
            }
        }

        best.map(|(name, _)| name.clone())
            .unwrap_or_else(|| trimmed.to_string())
    }

    /// Apply one settlement outcome: upsert in Postgres first (atomic
    /// attempts+1 plus exactly one outcome counter), then the mirror. Callers
    /// invoke this exactly once per job, gated on the settle transition.
    pub async fn record(
        &self,
        pool: &PgPool,
        org: &str,
        outcome: Outcome,
    ) -> Result<(), sqlx::Error> {
        org_queries::record_outcome(pool, org, outcome).await?;

        let mut counters = self.counters.write().expect("weight table lock poisoned");
        let c = counters.entry(org.to_string()).or_default();
        c.attempts += 1;
        match outcome {
            Outcome::Success => c.successes += 1,
            Outcome::Failure => {}
            Outcome::FraudReject => c.fraud_rejects += 1,
        }
        Ok(())
    }

    /// Apply an outcome to the mirror only (tests and replay tooling).
    #[cfg(test)]
    fn record_local(&self, org: &str, outcome: Outcome) {
        let mut counters = self.counters.write().expect("weight table lock poisoned");
        let c = counters.entry(org.to_string()).or_default();
        c.attempts += 1;
        match outcome {
            Outcome::Success => c.successes += 1,
            Outcome::Failure => {}
            Outcome::FraudReject => c.fraud_rejects += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: WeightParams = WeightParams {
        prior: 0.5,
        smoothing: 10.0,
        min_attempts: 5,
        fraud_penalty: 2.0,
    };

    #[test]
    fn test_cold_start_uses_prior() {
        assert_eq!(adjusted_weight(0, 0, 0, PARAMS), 0.5);
        assert_eq!(adjusted_weight(2, 0, 0, PARAMS), 0.5);
        assert_eq!(adjusted_weight(4, 4, 0, PARAMS), 0.5);
    }

    #[test]
    fn test_converges_toward_success_rate() {
        // All-success history pulls the weight above the prior, and more
        // evidence pulls it further.
        let few = adjusted_weight(10, 10, 0, PARAMS);
        let many = adjusted_weight(1000, 1000, 0, PARAMS);
        assert!(few > 0.5);
        assert!(many > few);
        assert!(many > 0.98);

        // All-failure history pulls it below.
        let bad = adjusted_weight(1000, 0, 0, PARAMS);
        assert!(bad < 0.01);
    }

    #[test]
    fn test_fraud_penalized_harder_than_failure() {
        // Same attempt/success counts: the fraud variant must score strictly
        // lower than the plain-failure variant.
        let with_failures = adjusted_weight(20, 10, 0, PARAMS);
        let with_fraud = adjusted_weight(20, 10, 5, PARAMS);
        assert!(with_fraud < with_failures);
    }

    #[test]
    fn test_weight_stays_in_unit_interval() {
        assert!(adjusted_weight(10, 0, 10, PARAMS) >= 0.0);
        assert!(adjusted_weight(10, 10, 0, PARAMS) <= 1.0);
    }

    #[test]
    fn test_success_rate_guards_zero_attempts() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(4, 2), 0.5);
    }

    #[test]
    fn test_table_attempts_identity() {
        let table = WeightTable::new(PARAMS);
        table.record_local("Alpha College", Outcome::Success);
        table.record_local("Alpha College", Outcome::Failure);
        table.record_local("Alpha College", Outcome::FraudReject);

        let counters = table.counters.read().unwrap();
        let c = counters.get("Alpha College").copied().unwrap();
        assert_eq!(c.attempts, 3);
        // failures are implicit: attempts - successes - fraud_rejects
        assert_eq!(c.successes + c.fraud_rejects + 1, c.attempts);
    }

    #[test]
    fn test_canonical_coalesces_variants() {
        let table = WeightTable::new(PARAMS);
        table.record_local("Alpha College", Outcome::Success);

        assert_eq!(table.canonical("Alpha College"), "Alpha College");
        assert_eq!(table.canonical("alpha college"), "Alpha College");
        assert_eq!(table.canonical("Beta Institute"), "Beta Institute");
    }

    #[test]
    fn test_unknown_org_gets_prior() {
        let table = WeightTable::new(PARAMS);
        assert_eq!(table.weight_for("Nowhere University"), 0.5);
    }
}
