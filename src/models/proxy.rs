use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Behavioral role of a proxy identity. The role determines which protocol
/// phase the identity may serve: warmup proxies establish sessions, submit
/// proxies carry the actual submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProxyRole {
    Warmup,
    Submit,
}

/// A network egress identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyIdentity {
    pub id: Uuid,
    /// Canonical form: `scheme://[user:pass@]host:port`.
    pub url: String,
    pub label: Option<String>,
    pub role: ProxyRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
