//! Boundary to the credit/referral ledger collaborator.
//!
//! The ledger itself (balances, VIP expiry, referral bonuses) lives outside
//! this engine. This client asks it two things: whether a metered caller can
//! afford a submission, and, at settlement, to debit exactly once per job.
//! The debit is keyed by the job id, so a retried settlement cannot
//! double-debit. Without a configured ledger URL the engine runs unmetered.

use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

const LEDGER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ledger returned HTTP {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    sufficient: bool,
}

/// Client for the ledger collaborator; `Disabled` admits everything and
/// debits nothing.
pub enum LedgerClient {
    Http { http: reqwest::Client, base_url: String },
    Disabled,
}

impl LedgerClient {
    pub fn from_config(ledger_url: Option<&str>) -> Result<Self, LedgerError> {
        match ledger_url {
            Some(base_url) => {
                let http = reqwest::Client::builder()
                    .timeout(LEDGER_TIMEOUT)
                    .build()?;
                Ok(LedgerClient::Http {
                    http,
                    base_url: base_url.trim_end_matches('/').to_string(),
                })
            }
            None => Ok(LedgerClient::Disabled),
        }
    }

    /// Does this caller have balance for one more verification?
    pub async fn sufficient_balance(&self, caller_id: &str) -> Result<bool, LedgerError> {
        match self {
            LedgerClient::Disabled => Ok(true),
            LedgerClient::Http { http, base_url } => {
                let response = http
                    .get(format!("{base_url}/api/v1/balance/{caller_id}"))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(LedgerError::Status(response.status()));
                }

                let body: BalanceResponse = response.json().await?;
                Ok(body.sufficient)
            }
        }
    }

    /// Debit one verification from the caller. Idempotent per job: the job id
    /// travels as the idempotency key and the ledger deduplicates on it.
    pub async fn debit(&self, caller_id: &str, job_id: Uuid) -> Result<(), LedgerError> {
        match self {
            LedgerClient::Disabled => Ok(()),
            LedgerClient::Http { http, base_url } => {
                let response = http
                    .post(format!("{base_url}/api/v1/debit"))
                    .header("idempotency-key", job_id.to_string())
                    .json(&serde_json::json!({
                        "caller_id": caller_id,
                        "job_id": job_id,
                    }))
                    .send()
                    .await?;

                if !response.status().is_success() {
                    return Err(LedgerError::Status(response.status()));
                }
                Ok(())
            }
        }
    }
}
