//! The remote HerbLink service as seen by the sync engine.
//!
//! [`RemoteSubmitter`] is the seam the engine uploads through. The HTTP
//! implementation posts the JSON payload and passes the record's local id as
//! an `Idempotency-Key`, so a retried upload after an ambiguous timeout does
//! not create a second remote record.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::connectivity::ConnectivityProbe;
use crate::error::Result;
use crate::submission::{FailureKind, SubmissionPayload};

/// Header carrying the idempotency token.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Longest response excerpt kept in a failure reason.
const MAX_REASON_LEN: usize = 200;

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAck {
    /// Identifier the service assigned to the record.
    pub remote_id: String,
}

/// Why an upload did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The service refused the payload; retrying without changes won't help.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The outcome is unknown or the service is temporarily unavailable.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl SubmitError {
    /// The failure kind recorded on the submission.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Rejected(_) => FailureKind::Rejected,
            Self::Transient(_) => FailureKind::Transient,
        }
    }

    /// The human-readable reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Rejected(reason) | Self::Transient(reason) => reason,
        }
    }
}

/// Uploads submission payloads to the remote service.
#[async_trait]
pub trait RemoteSubmitter: Send + Sync {
    /// Upload one payload.
    ///
    /// Implementations must treat `idempotency_key` as the identity of the
    /// logical submission: repeating a call with the same key must not
    /// create a second remote record.
    async fn submit(
        &self,
        payload: &SubmissionPayload<'_>,
        idempotency_key: &str,
    ) -> std::result::Result<RemoteAck, SubmitError>;
}

/// Body returned by the service for a created submission.
#[derive(Debug, Deserialize)]
struct CreatedSubmission {
    id: Value,
}

/// HTTP client for the HerbLink API.
#[derive(Debug, Clone)]
pub struct HttpSubmitter {
    client: Client,
    submit_url: String,
    health_url: String,
}

impl HttpSubmitter {
    /// Create a submitter from the remote configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            submit_url: format!("{base}{}", config.submit_path),
            health_url: format!("{base}{}", config.health_path),
        })
    }

    /// URL submissions are posted to.
    #[must_use]
    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }
}

#[async_trait]
impl RemoteSubmitter for HttpSubmitter {
    async fn submit(
        &self,
        payload: &SubmissionPayload<'_>,
        idempotency_key: &str,
    ) -> std::result::Result<RemoteAck, SubmitError> {
        debug!(idempotency_key, url = %self.submit_url, "Posting submission");

        let response = self
            .client
            .post(&self.submit_url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| SubmitError::Transient(describe_send_error(&e)))?;

        let status = response.status();
        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| SubmitError::Transient(format!("failed to read response: {e}")))?;
            return parse_ack(&body);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}

#[async_trait]
impl ConnectivityProbe for HttpSubmitter {
    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }
}

fn describe_send_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        format!("request failed: {err}")
    }
}

/// Extract the remote id from a 2xx body.
fn parse_ack(body: &str) -> std::result::Result<RemoteAck, SubmitError> {
    let created: CreatedSubmission = serde_json::from_str(body).map_err(|e| {
        SubmitError::Transient(format!("undecodable response body: {e}"))
    })?;
    let remote_id = match created.id {
        Value::String(id) if !id.trim().is_empty() => id,
        Value::Number(id) => id.to_string(),
        other => {
            return Err(SubmitError::Transient(format!(
                "response carried an unusable id: {other}"
            )))
        }
    };
    Ok(RemoteAck { remote_id })
}

/// Whether a non-success status is worth retrying.
fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || matches!(status.as_u16(), 408 | 425 | 429)
}

fn classify_failure(status: StatusCode, body: &str) -> SubmitError {
    let reason = match error_detail(body) {
        Some(detail) => format!("{status}: {detail}"),
        None if body.trim().is_empty() => status.to_string(),
        None => format!("{status}: {}", truncate(body.trim())),
    };
    if is_retryable(status) || !status.is_client_error() {
        SubmitError::Transient(reason)
    } else {
        SubmitError::Rejected(reason)
    }
}

/// Pull the `detail` message out of an error body.
///
/// `detail` is either a string or a list of validation entries with a
/// `msg` field.
fn error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Array(entries) => {
            let messages: Vec<String> = entries
                .iter()
                .filter_map(|entry| {
                    let msg = entry.get("msg")?.as_str()?;
                    let field = entry
                        .get("loc")
                        .and_then(Value::as_array)
                        .and_then(|loc| loc.last())
                        .and_then(Value::as_str);
                    Some(match field {
                        Some(field) => format!("{field}: {msg}"),
                        None => msg.to_string(),
                    })
                })
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        other => Some(truncate(&other.to_string())),
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_REASON_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
