//! Client for the external verification service.
//!
//! The protocol has two phases, carried over different egress identities:
//! a warmup GET against the verification link that yields session context
//! (cookies, a CSRF token, the organization behind the session and the
//! current protocol step), and a JSON submission of subject attributes whose
//! response resolves the attempt. [`VerificationService`] is the seam the
//! job engine is generic over; [`HttpVerifyClient`] is the production
//! implementation.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::models::proxy::ProxyIdentity;
use crate::models::subject::SubjectAttributes;
use crate::services::link::VerificationLink;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Response markers the service uses to flag tripped anti-automation rules.
const FRAUD_ERROR_IDS: &[&str] = &["fraudRulesReject", "automationDetected", "riskScoreExceeded"];

/// Session context extracted during the warmup phase.
#[derive(Debug, Clone)]
pub struct WarmupSession {
    /// `Cookie` header value replayed on the submit request.
    pub cookies: String,
    pub csrf_token: String,
    pub current_step: String,
    pub organization_name: String,
}

/// Terminal interpretation of the service's submit response.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Verified { redirect_url: String },
    Rejected { reason: String },
    ManualReview { redirect_url: Option<String> },
    FraudFlagged { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("verification session rejected: {0}")]
    SessionRejected(String),

    #[error("malformed service response: {0}")]
    Protocol(String),
}

impl VerifyError {
    /// Transport-class failures are worth retrying with a fresh proxy and may
    /// indicate a dead egress identity.
    pub fn is_transport(&self) -> bool {
        matches!(self, VerifyError::Http(_))
    }
}

/// Seam between the job engine and the external service.
pub trait VerificationService: Send + Sync {
    fn establish_session(
        &self,
        proxy: &ProxyIdentity,
        link: &VerificationLink,
    ) -> impl Future<Output = Result<WarmupSession, VerifyError>> + Send;

    fn submit_subject(
        &self,
        proxy: &ProxyIdentity,
        link: &VerificationLink,
        session: &WarmupSession,
        subject: &SubjectAttributes,
    ) -> impl Future<Output = Result<SubmitOutcome, VerifyError>> + Send;

    /// Live probe of the session's current step without submitting anything
    /// (the dashboard's dry-run check).
    fn probe_step(
        &self,
        proxy: Option<&ProxyIdentity>,
        link: &VerificationLink,
    ) -> impl Future<Output = Result<String, VerifyError>> + Send;
}

#[derive(Serialize)]
struct SubmitPayload<'a> {
    #[serde(rename = "firstName")]
    first_name: &'a str,
    #[serde(rename = "lastName")]
    last_name: &'a str,
    email: &'a str,
    #[serde(rename = "birthDate")]
    birth_date: String,
    #[serde(rename = "organizationName")]
    organization_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "currentStep")]
    current_step: String,
    #[serde(rename = "redirectUrl")]
    redirect_url: Option<String>,
    #[serde(rename = "errorIds", default)]
    error_ids: Vec<String>,
    message: Option<String>,
}

/// Production client: one short-lived reqwest client per call, bound to the
/// egress identity it was handed.
pub struct HttpVerifyClient {
    timeout: Duration,
}

impl HttpVerifyClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client_for(&self, proxy: Option<&ProxyIdentity>) -> Result<reqwest::Client, VerifyError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout);

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(&proxy.url)?);
        }

        Ok(builder.build()?)
    }
}

impl VerificationService for HttpVerifyClient {
    async fn establish_session(
        &self,
        proxy: &ProxyIdentity,
        link: &VerificationLink,
    ) -> Result<WarmupSession, VerifyError> {
        let client = self.client_for(Some(proxy))?;
        let response = client.get(link.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::SessionRejected(format!(
                "warmup returned HTTP {status}"
            )));
        }

        let cookies = collect_cookies(response.headers());
        let html = response.text().await?;
        let (csrf_token, organization_name, current_step) = extract_session(&html)?;

        Ok(WarmupSession {
            cookies,
            csrf_token,
            current_step,
            organization_name,
        })
    }

    async fn submit_subject(
        &self,
        proxy: &ProxyIdentity,
        link: &VerificationLink,
        session: &WarmupSession,
        subject: &SubjectAttributes,
    ) -> Result<SubmitOutcome, VerifyError> {
        let client = self.client_for(Some(proxy))?;

        let origin = &link.url[..url::Position::BeforePath];
        let submit_url = format!("{origin}/api/verify/{}/submit", link.session_ref);

        let payload = SubmitPayload {
            first_name: &subject.given_name,
            last_name: &subject.family_name,
            email: &subject.email,
            birth_date: subject.birth_date.format("%Y-%m-%d").to_string(),
            organization_name: &session.organization_name,
        };

        let response = client
            .post(&submit_url)
            .header(COOKIE, &session.cookies)
            .header("x-csrf-token", &session.csrf_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<SubmitResponse>(&body) {
            Ok(parsed) => Ok(map_submit_response(parsed)),
            Err(_) if !status.is_success() => Err(VerifyError::SessionRejected(format!(
                "submit returned HTTP {status}"
            ))),
            Err(e) => Err(VerifyError::Protocol(format!(
                "undecodable submit response: {e}"
            ))),
        }
    }

    async fn probe_step(
        &self,
        proxy: Option<&ProxyIdentity>,
        link: &VerificationLink,
    ) -> Result<String, VerifyError> {
        let client = self.client_for(proxy)?;
        let response = client.get(link.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::SessionRejected(format!(
                "probe returned HTTP {status}"
            )));
        }

        let html = response.text().await?;
        let (_, _, step) = extract_session(&html)?;
        Ok(step)
    }
}

/// Fold `Set-Cookie` response headers into one `Cookie` request header value.
fn collect_cookies(headers: &HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Extract `(csrf_token, organization_name, current_step)` from the warmup
/// page.
fn extract_session(html: &str) -> Result<(String, String, String), VerifyError> {
    let document = Html::parse_document(html);
    let csrf_sel = Selector::parse(r#"meta[name="csrf-token"]"#).expect("valid selector");
    let org_sel = Selector::parse("[data-organization-name]").expect("valid selector");
    let step_sel = Selector::parse("[data-verification-step]").expect("valid selector");

    let csrf_token = document
        .select(&csrf_sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string)
        .ok_or_else(|| VerifyError::Protocol("warmup page carries no CSRF token".to_string()))?;

    let organization_name = document
        .select(&org_sel)
        .next()
        .and_then(|el| el.value().attr("data-organization-name"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            VerifyError::Protocol("warmup page names no organization".to_string())
        })?;

    let current_step = document
        .select(&step_sel)
        .next()
        .and_then(|el| el.value().attr("data-verification-step"))
        .map(str::to_string)
        .unwrap_or_else(|| "collectPersonalInfo".to_string());

    Ok((csrf_token, organization_name, current_step))
}

/// Map the service's submit response onto a terminal outcome.
///
/// Anything the mapping cannot classify definitively lands on
/// `ManualReview`, never on success or failure.
fn map_submit_response(resp: SubmitResponse) -> SubmitOutcome {
    if resp
        .error_ids
        .iter()
        .any(|id| FRAUD_ERROR_IDS.contains(&id.as_str()))
    {
        return SubmitOutcome::FraudFlagged {
            reason: resp
                .message
                .unwrap_or_else(|| resp.error_ids.join(", ")),
        };
    }

    match resp.current_step.as_str() {
        "success" => match resp.redirect_url {
            Some(redirect_url) => SubmitOutcome::Verified { redirect_url },
            // Success without a redirect is unclassifiable; hand it to a human.
            None => SubmitOutcome::ManualReview { redirect_url: None },
        },
        "error" => SubmitOutcome::Rejected {
            reason: resp
                .message
                .unwrap_or_else(|| "verification rejected".to_string()),
        },
        "docUpload" | "pending" | "pendingReview" => SubmitOutcome::ManualReview {
            redirect_url: resp.redirect_url,
        },
        _ => SubmitOutcome::ManualReview {
            redirect_url: resp.redirect_url,
        },
    }
}
