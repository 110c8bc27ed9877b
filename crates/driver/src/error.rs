//! Flow error taxonomy
//!
//! Drivers only ever produce `FlowError`. The engine annotates errors with
//! the driver and step they came from but never changes their kind; the
//! presentation layer in the service is the only place an error becomes an
//! HTTP response.

use std::fmt;

use serde::Serialize;
use tracing::error;

use crate::types::DriverId;

/// Stable error classification exposed to programmatic callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Caller request is malformed or missing a required field
    InvalidInput,
    /// Flow state absent, expired, tampered with, or already consumed
    ExpiredOrMissingState,
    /// Provider answered with a recognised error payload
    ProviderRejected,
    /// Polling-style login has not completed yet (non-terminal)
    PollingIncomplete,
    /// Network failure, timeout, or non-2xx without a parseable error
    UpstreamUnavailable,
    /// Anything unanticipated; detail is logged, never echoed
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::ExpiredOrMissingState => "ExpiredOrMissingState",
            ErrorKind::ProviderRejected => "ProviderRejected",
            ErrorKind::PollingIncomplete => "PollingIncomplete",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::Internal => "Internal",
        }
    }

    /// HTTP status a programmatic caller receives for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput | ErrorKind::ExpiredOrMissingState => 400,
            ErrorKind::ProviderRejected => 403,
            ErrorKind::PollingIncomplete => 200,
            ErrorKind::UpstreamUnavailable => 502,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of a flow at which an error was raised. Context only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStep {
    Authorize,
    Callback,
    Exchange,
    Poll,
    Refresh,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::Authorize => "authorize",
            FlowStep::Callback => "callback",
            FlowStep::Exchange => "exchange",
            FlowStep::Poll => "poll",
            FlowStep::Refresh => "refresh",
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced by any step of a flow.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FlowError {
    pub kind: ErrorKind,
    /// Caller-visible message. Provider messages are preserved verbatim.
    pub message: String,
    pub driver: Option<DriverId>,
    pub step: Option<FlowStep>,
    /// Raw provider status for `PollingIncomplete` (e.g. `WaitLogin`)
    pub provider_status: Option<String>,
}

impl FlowError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            driver: None,
            step: None,
            provider_status: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn missing_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExpiredOrMissingState, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderRejected, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    /// Non-terminal "login not completed yet" for polling drivers.
    pub fn pending(provider_status: impl Into<String>) -> Self {
        let provider_status = provider_status.into();
        let mut err = Self::new(
            ErrorKind::PollingIncomplete,
            format!("login not completed yet ({provider_status})"),
        );
        err.provider_status = Some(provider_status);
        err
    }

    /// Coerce an unanticipated failure. The detail is logged here and is
    /// never part of the caller-visible message.
    pub fn internal(detail: impl fmt::Display) -> Self {
        error!(detail = %detail, "internal flow error");
        Self::new(ErrorKind::Internal, "internal error")
    }

    /// Annotate with the originating driver and step, keeping any context
    /// already attached closer to the source.
    pub fn context(mut self, driver: DriverId, step: FlowStep) -> Self {
        self.driver.get_or_insert(driver);
        self.step.get_or_insert(step);
        self
    }

    pub fn http_status(&self) -> u16 {
        self.kind.http_status()
    }

    /// Whether this error ends the flow (everything except polling).
    pub fn is_terminal(&self) -> bool {
        self.kind != ErrorKind::PollingIncomplete
    }
}

/// Result alias for driver operations.
pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_documented_statuses() {
        assert_eq!(ErrorKind::InvalidInput.http_status(), 400);
        assert_eq!(ErrorKind::ExpiredOrMissingState.http_status(), 400);
        assert_eq!(ErrorKind::ProviderRejected.http_status(), 403);
        assert_eq!(ErrorKind::PollingIncomplete.http_status(), 200);
        assert_eq!(ErrorKind::UpstreamUnavailable.http_status(), 502);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn kind_serializes_as_stable_name() {
        let json = serde_json::to_string(&ErrorKind::ProviderRejected).unwrap();
        assert_eq!(json, "\"ProviderRejected\"");
    }

    #[test]
    fn internal_never_echoes_detail() {
        let err = FlowError::internal("aes-gcm: tag mismatch at offset 12");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "internal error");
        assert!(!err.to_string().contains("aes-gcm"));
    }

    #[test]
    fn context_keeps_innermost_annotation() {
        let err = FlowError::rejected("nope")
            .context(DriverId::Aliyun, FlowStep::Poll)
            .context(DriverId::Aliyun, FlowStep::Callback);
        assert_eq!(err.step, Some(FlowStep::Poll));
        assert_eq!(err.driver, Some(DriverId::Aliyun));
        assert_eq!(err.message, "nope");
    }

    #[test]
    fn pending_is_not_terminal() {
        let err = FlowError::pending("WaitLogin");
        assert!(!err.is_terminal());
        assert_eq!(err.provider_status.as_deref(), Some("WaitLogin"));
        assert!(FlowError::upstream("down").is_terminal());
    }
}
