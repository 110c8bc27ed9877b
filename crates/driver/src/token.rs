//! Token results and provider call plumbing
//!
//! Every provider call goes through `send`, so the error translation rules
//! are the same for all drivers:
//! - transport failure or timeout: `UpstreamUnavailable`
//! - non-2xx with a payload the driver recognises: `ProviderRejected`,
//!   message preserved verbatim
//! - non-2xx without one, or an unparseable success body: `UpstreamUnavailable`
//!
//! Nothing here retries. Authorization codes are single-use, so a timeout is
//! reported rather than replayed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FlowError, Result};

/// Normalized token output delivered to the caller.
///
/// Provider-specific fields (`scope`, `token_type`, `sign_key`, `app_id`...)
/// pass through opaquely in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResult {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Raw provider reply: status plus body bytes.
#[derive(Debug)]
pub(crate) struct ProviderReply {
    pub status: reqwest::StatusCode,
    pub body: Vec<u8>,
}

/// Recognises a provider's error payload and renders its message.
pub(crate) type RejectionParser = fn(&[u8]) -> Option<String>;

/// Send one provider request and read the whole body.
pub(crate) async fn send(request: reqwest::RequestBuilder, what: &str) -> Result<ProviderReply> {
    let response = request.send().await.map_err(|e| transport_error(e, what))?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(e, what))?
        .to_vec();
    debug!(endpoint = what, status = status.as_u16(), "provider replied");
    Ok(ProviderReply { status, body })
}

fn transport_error(e: reqwest::Error, what: &str) -> FlowError {
    if e.is_timeout() {
        warn!(endpoint = what, "provider call timed out");
        FlowError::upstream(format!("{what} timed out"))
    } else {
        warn!(endpoint = what, error = %e, "provider call failed");
        FlowError::upstream(format!("{what} unreachable"))
    }
}

impl ProviderReply {
    /// Decode a 2xx body, translating failures with the driver's parser.
    pub fn json<T: DeserializeOwned>(self, what: &str, rejection: RejectionParser) -> Result<T> {
        if !self.status.is_success() {
            return Err(self.failure(what, rejection));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| FlowError::upstream(format!("{what} returned an unreadable body: {e}")))
    }

    pub fn failure(&self, what: &str, rejection: RejectionParser) -> FlowError {
        match rejection(&self.body) {
            Some(message) => FlowError::rejected(message),
            None => FlowError::upstream(format!("{what} returned {}", self.status)),
        }
    }
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// RFC 6749 error body: `{"error": "...", "error_description": "..."}`.
pub(crate) fn oauth_rejection(body: &[u8]) -> Option<String> {
    let parsed: OAuthErrorBody = serde_json::from_slice(body).ok()?;
    Some(match parsed.error_description {
        Some(desc) if !desc.is_empty() => format!("{}: {desc}", parsed.error),
        _ => parsed.error,
    })
}
