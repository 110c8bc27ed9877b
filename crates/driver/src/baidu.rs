//! Baidu Netdisk
//!
//! Runs on a fixed platform app configured on the relay. A caller may bring
//! its own app instead by supplying both `client_id` and `client_secret`;
//! only then does a secret travel in the flow state.

use tracing::debug;

use crate::config::BaiduConfig;
use crate::error::{FlowError, Result};
use crate::token::{self, TokenResult};
use crate::types::{
    AppCredentials, Authorization, CallbackParams, DriverId, FlowRequest, FlowState,
};
use crate::{BoxFuture, Driver, templated_url};

const VARIANT: &str = "netdisk";

pub struct BaiduDriver {
    config: BaiduConfig,
    client: reqwest::Client,
}

impl BaiduDriver {
    pub fn new(config: BaiduConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Caller app when one was supplied, otherwise the platform app.
    fn app<'a>(&'a self, credentials: &'a AppCredentials) -> Result<(&'a str, &'a str)> {
        if credentials.client_id.is_some() {
            return Ok((
                credentials.require_client_id()?,
                credentials.require_client_secret()?,
            ));
        }
        let client_id = self
            .config
            .client_id
            .as_deref()
            .ok_or_else(|| FlowError::invalid_input("invalid client_id"))?;
        let client_secret = self
            .config
            .client_secret
            .as_ref()
            .map(|s| s.expose().as_str())
            .ok_or_else(|| FlowError::invalid_input("invalid client_secret"))?;
        Ok((client_id, client_secret))
    }

    async fn token(&self, form: &[(&str, &str)]) -> Result<TokenResult> {
        let request = self.client.post(&self.config.token_url).form(form);
        token::send(request, "baidu token endpoint")
            .await?
            .json("baidu token endpoint", token::oauth_rejection)
    }
}

impl Driver for BaiduDriver {
    fn id(&self) -> DriverId {
        DriverId::Baidu
    }

    fn build_authorize_url<'a>(
        &'a self,
        req: &'a FlowRequest,
    ) -> BoxFuture<'a, Result<Authorization>> {
        Box::pin(async move {
            match req.variant.as_deref() {
                None => {}
                Some(v) if v.eq_ignore_ascii_case(VARIANT) => {}
                Some(v) => return Err(FlowError::invalid_input(format!("invalid variant: {v}"))),
            }
            let platform = req.credentials.client_id.is_none();
            let (client_id, _) = self.app(&req.credentials)?;
            let url = templated_url(
                &self.config.authorize_url,
                &[
                    ("response_type", "code"),
                    ("client_id", client_id),
                    ("redirect_uri", req.redirect_uri.as_str()),
                    ("scope", self.config.scope.as_str()),
                    ("display", "popup"),
                    ("force_login", "1"),
                ],
            )?;
            let authorization = Authorization::new(url, VARIANT);
            Ok(if platform {
                authorization.on_platform_app()
            } else {
                authorization
            })
        })
    }

    fn exchange_code<'a>(
        &'a self,
        params: &'a CallbackParams,
        state: &'a FlowState,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        Box::pin(async move {
            let code = params
                .code()
                .ok_or_else(|| FlowError::invalid_input("invalid code"))?;
            let credentials = state.credentials();
            let (client_id, client_secret) = self.app(&credentials)?;

            debug!(platform_app = credentials.client_id.is_none(), "exchanging baidu code");
            self.token(&[
                ("grant_type", "authorization_code"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("redirect_uri", state.redirect_uri.as_str()),
            ])
            .await
        })
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
        credentials: &'a AppCredentials,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        Box::pin(async move {
            let (client_id, client_secret) = self.app(credentials)?;
            self.token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .await
        })
    }
}
