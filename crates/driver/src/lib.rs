//! Provider drivers for the OAuth relay
//!
//! Defines the `Driver` trait that hides each cloud-storage provider's
//! parameter names, endpoint shapes and error payloads behind one contract:
//! - `build_authorize_url` turns a validated request into the provider's
//!   authorize URL (plus any data the callback will need)
//! - `exchange_code` turns callback parameters and the carried state into
//!   a normalized `TokenResult`, running multi-call sequences internally
//! - `refresh` is an optional capability
//!
//! The set of providers is closed: `AnyDriver` has one variant per provider
//! and dispatch is an exhaustive match.

pub mod aliyun;
pub mod baidu;
pub mod config;
pub mod error;
pub mod onedrive;
pub mod quark;
pub mod token;
pub mod types;

pub use aliyun::AliyunDriver;
pub use baidu::BaiduDriver;
pub use config::ProvidersConfig;
pub use error::{ErrorKind, FlowError, FlowStep, Result};
pub use onedrive::OneDriveDriver;
pub use quark::QuarkDriver;
pub use token::TokenResult;
pub use types::{
    AppCredentials, Authorization, CallbackParams, DriverId, FlowRequest, FlowState,
};

use std::future::Future;
use std::pin::Pin;

use reqwest::Url;

/// Boxed future returned by driver operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One cloud-storage provider's side of the authorization code flow.
///
/// Uses `Pin<Box<dyn Future>>` return types so drivers stay object-safe.
pub trait Driver: Send + Sync {
    fn id(&self) -> DriverId;

    /// Build the provider's authorize URL.
    ///
    /// Missing required fields fail with `InvalidInput` before any network
    /// call. Most drivers only template a URL; drivers whose provider
    /// assigns the URL may fail with `UpstreamUnavailable`.
    fn build_authorize_url<'a>(
        &'a self,
        req: &'a FlowRequest,
    ) -> BoxFuture<'a, Result<Authorization>>;

    /// Whether `build_authorize_url` goes to the provider for this request
    /// rather than templating a URL locally.
    fn authorize_calls_provider(&self, _req: &FlowRequest) -> bool {
        false
    }

    /// Complete the flow for the given callback.
    fn exchange_code<'a>(
        &'a self,
        params: &'a CallbackParams,
        state: &'a FlowState,
    ) -> BoxFuture<'a, Result<TokenResult>>;

    fn supports_refresh(&self) -> bool {
        false
    }

    /// Exchange a refresh token for a new access token.
    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
        _credentials: &'a AppCredentials,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        let id = self.id();
        Box::pin(async move {
            Err(FlowError::invalid_input(format!(
                "refresh not supported by {id}"
            )))
        })
    }
}

/// Closed set of drivers. Adding a provider means adding a variant here.
pub enum AnyDriver {
    OneDrive(OneDriveDriver),
    Aliyun(AliyunDriver),
    Baidu(BaiduDriver),
    Quark(QuarkDriver),
}

impl AnyDriver {
    fn inner(&self) -> &dyn Driver {
        match self {
            AnyDriver::OneDrive(d) => d,
            AnyDriver::Aliyun(d) => d,
            AnyDriver::Baidu(d) => d,
            AnyDriver::Quark(d) => d,
        }
    }
}

impl Driver for AnyDriver {
    fn id(&self) -> DriverId {
        self.inner().id()
    }

    fn build_authorize_url<'a>(
        &'a self,
        req: &'a FlowRequest,
    ) -> BoxFuture<'a, Result<Authorization>> {
        self.inner().build_authorize_url(req)
    }

    fn authorize_calls_provider(&self, req: &FlowRequest) -> bool {
        self.inner().authorize_calls_provider(req)
    }

    fn exchange_code<'a>(
        &'a self,
        params: &'a CallbackParams,
        state: &'a FlowState,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        self.inner().exchange_code(params, state)
    }

    fn supports_refresh(&self) -> bool {
        self.inner().supports_refresh()
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
        credentials: &'a AppCredentials,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        self.inner().refresh(refresh_token, credentials)
    }
}

/// Driver registry, one instance per provider sharing a single HTTP client.
pub struct Drivers {
    onedrive: AnyDriver,
    aliyun: AnyDriver,
    baidu: AnyDriver,
    quark: AnyDriver,
}

impl Drivers {
    pub fn new(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        Self {
            onedrive: AnyDriver::OneDrive(OneDriveDriver::new(
                config.onedrive.clone(),
                client.clone(),
            )),
            aliyun: AnyDriver::Aliyun(AliyunDriver::new(config.aliyun.clone(), client.clone())),
            baidu: AnyDriver::Baidu(BaiduDriver::new(config.baidu.clone(), client.clone())),
            quark: AnyDriver::Quark(QuarkDriver::new(config.quark.clone(), client)),
        }
    }

    pub fn get(&self, id: DriverId) -> &AnyDriver {
        match id {
            DriverId::OneDrive => &self.onedrive,
            DriverId::Aliyun => &self.aliyun,
            DriverId::Baidu => &self.baidu,
            DriverId::Quark => &self.quark,
        }
    }
}

/// Append query parameters to a configured endpoint.
pub(crate) fn templated_url(base: &str, params: &[(&str, &str)]) -> Result<Url> {
    Url::parse_with_params(base, params)
        .map_err(|e| FlowError::internal(format!("bad endpoint {base}: {e}")))
}
