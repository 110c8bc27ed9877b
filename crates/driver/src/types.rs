//! Flow data model: requests, carried state, callback parameters

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use common::Secret;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Closed set of supported providers. The lowercase name is the route prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverId {
    OneDrive,
    Aliyun,
    Baidu,
    Quark,
}

impl DriverId {
    pub const ALL: [DriverId; 4] = [
        DriverId::OneDrive,
        DriverId::Aliyun,
        DriverId::Baidu,
        DriverId::Quark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriverId::OneDrive => "onedrive",
            DriverId::Aliyun => "aliyun",
            DriverId::Baidu => "baidu",
            DriverId::Quark => "quark",
        }
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverId {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onedrive" => Ok(DriverId::OneDrive),
            "aliyun" | "alicloud" | "aliyundrive" => Ok(DriverId::Aliyun),
            "baidu" | "baidupcs" => Ok(DriverId::Baidu),
            "quark" | "quark_oa" => Ok(DriverId::Quark),
            other => Err(FlowError::invalid_input(format!("unknown driver: {other}"))),
        }
    }
}

/// Caller-supplied application credentials.
#[derive(Debug, Clone, Default)]
pub struct AppCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<Secret<String>>,
}

impl AppCredentials {
    pub fn new(client_id: Option<String>, client_secret: Option<String>) -> Self {
        Self {
            client_id: non_empty(client_id),
            client_secret: non_empty(client_secret).map(Secret::new),
        }
    }

    pub fn require_client_id(&self) -> Result<&str> {
        self.client_id
            .as_deref()
            .ok_or_else(|| FlowError::invalid_input("invalid client_id"))
    }

    pub fn require_client_secret(&self) -> Result<&str> {
        self.client_secret
            .as_ref()
            .map(|s| s.expose().as_str())
            .ok_or_else(|| FlowError::invalid_input("invalid client_secret"))
    }
}

/// Validated input that starts a flow.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    pub driver: DriverId,
    pub variant: Option<String>,
    pub credentials: AppCredentials,
    /// Where the provider sends the browser back to. Always absolute.
    pub redirect_uri: String,
    pub interactive: bool,
}

impl FlowRequest {
    /// Build a request, rejecting malformed input before any driver sees it.
    pub fn new(
        driver: DriverId,
        variant: Option<String>,
        credentials: AppCredentials,
        redirect_uri: String,
        interactive: bool,
    ) -> Result<Self> {
        let parsed = Url::parse(&redirect_uri)
            .map_err(|e| FlowError::invalid_input(format!("invalid redirect_uri: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FlowError::invalid_input(
                "invalid redirect_uri: must be an http(s) URL",
            ));
        }

        Ok(Self {
            driver,
            variant: non_empty(variant),
            credentials,
            redirect_uri,
            interactive,
        })
    }
}

/// What a driver hands back from the authorize step.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub url: Url,
    /// Variant the driver actually resolved (defaults applied)
    pub variant: String,
    /// Driver-private data to keep until the callback (e.g. a polling sid)
    pub aux: BTreeMap<String, String>,
    /// False when the driver ran on a relay-owned app, so the caller's
    /// credentials must not be carried to the callback.
    pub carries_credentials: bool,
}

impl Authorization {
    pub fn new(url: Url, variant: impl Into<String>) -> Self {
        Self {
            url,
            variant: variant.into(),
            aux: BTreeMap::new(),
            carries_credentials: true,
        }
    }

    pub fn on_platform_app(mut self) -> Self {
        self.carries_credentials = false;
        self
    }

    pub fn with_aux(mut self, key: &str, value: impl Into<String>) -> Self {
        self.aux.insert(key.to_string(), value.into());
        self
    }
}

/// State that survives the round trip to the provider.
///
/// Immutable once written. Unknown fields are rejected on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowState {
    pub driver: DriverId,
    pub variant: String,
    pub client_id: Option<String>,
    /// Present only when the caller supplied its own credentials
    pub client_secret: Option<Secret<String>>,
    pub redirect_uri: String,
    pub interactive: bool,
    pub aux: BTreeMap<String, String>,
}

impl FlowState {
    pub fn new(req: &FlowRequest, authorization: &Authorization) -> Self {
        let credentials = if authorization.carries_credentials {
            req.credentials.clone()
        } else {
            AppCredentials::default()
        };
        Self {
            driver: req.driver,
            variant: authorization.variant.clone(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            redirect_uri: req.redirect_uri.clone(),
            interactive: req.interactive,
            aux: authorization.aux.clone(),
        }
    }

    pub fn credentials(&self) -> AppCredentials {
        AppCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }
}

/// Query parameters a provider sends back to the callback route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub nonce: Option<String>,
    pub sid: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Provider-reported denial (e.g. user declined consent).
    pub fn provider_error(&self) -> Option<FlowError> {
        let error = self.error.as_deref().filter(|e| !e.is_empty())?;
        let message = match self.error_description.as_deref() {
            Some(desc) if !desc.is_empty() => format!("{error}: {desc}"),
            _ => error.to_string(),
        };
        Some(FlowError::rejected(message))
    }
}

/// Trim and drop empty strings so "" behaves like an absent field.
pub fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
