use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a verification job. Transitions only move forward:
/// `pending -> running -> {success, failed, review}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Review,
}

impl JobStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Review)
    }
}

/// Failure classification surfaced on failed jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorClass {
    InvalidLink,
    ProxyExhausted,
    NetworkTimeout,
    ExternalRejection,
    FraudDetected,
    InternalError,
}

/// Severity of a persisted job log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// A verification job as stored in Postgres.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub verification_ref: String,
    pub url: String,
    pub status: JobStatus,
    pub organization_name: Option<String>,
    pub subject_name: Option<String>,
    pub subject_email: Option<String>,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    pub has_document: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// One line of a job's append-only log stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub job_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "running", "success", "failed", "review"] {
            let parsed = JobStatus::from_str(s).unwrap();
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Review.is_terminal());
    }

    #[test]
    fn test_error_class_wire_format() {
        assert_eq!(ErrorClass::ProxyExhausted.to_string(), "proxy-exhausted");
        assert_eq!(
            ErrorClass::from_str("fraud-detected").unwrap(),
            ErrorClass::FraudDetected
        );
    }
}
