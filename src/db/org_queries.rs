use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::models::org::Outcome;

/// Raw per-organization counters (derived fields are computed by the caller).
#[derive(Debug, Clone)]
pub struct OrgCounterRow {
    pub name: String,
    pub attempts: i64,
    pub successes: i64,
    pub failures: i64,
    pub fraud_rejects: i64,
    pub updated_at: DateTime<Utc>,
}

/// Apply one settlement outcome to an organization's counters.
///
/// A single upsert carries `attempts + 1` and exactly one outcome counter
/// `+ 1`, so the pair lands atomically; concurrent settlements for the same
/// organization serialize on the row, different organizations do not contend.
pub async fn record_outcome(
    pool: &PgPool,
    name: &str,
    outcome: Outcome,
) -> Result<(), sqlx::Error> {
    let (s, f, fr) = match outcome {
        Outcome::Success => (1i64, 0i64, 0i64),
        Outcome::Failure => (0, 1, 0),
        Outcome::FraudReject => (0, 0, 1),
    };

    sqlx::query(
        r#"
        INSERT INTO organization_stats (name, attempts, successes, failures, fraud_rejects)
        VALUES ($1, 1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE
        SET attempts = organization_stats.attempts + 1,
            successes = organization_stats.successes + $2,
            failures = organization_stats.failures + $3,
            fraud_rejects = organization_stats.fraud_rejects + $4,
            updated_at = NOW()
        "#,
    )
    .bind(name)
    .bind(s)
    .bind(f)
    .bind(fr)
    .execute(pool)
    .await?;

    Ok(())
}

/// All organization counter rows, most attempts first.
pub async fn list_stats(pool: &PgPool) -> Result<Vec<OrgCounterRow>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT name, attempts, successes, failures, fraud_rejects, updated_at
        FROM organization_stats
        ORDER BY attempts DESC, name ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            Ok(OrgCounterRow {
                name: r.try_get("name")?,
                attempts: r.try_get("attempts")?,
                successes: r.try_get("successes")?,
                failures: r.try_get("failures")?,
                fraud_rejects: r.try_get("fraud_rejects")?,
                updated_at: r.try_get("updated_at")?,
            })
        })
        .collect()
}
