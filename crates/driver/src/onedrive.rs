//! Microsoft OneDrive (global and national clouds)
//!
//! Caller-supplied app credentials, templated authorize URL, form-encoded
//! token exchange. The variant picks the national cloud endpoint pair.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::{Endpoints, OneDriveConfig};
use crate::error::{FlowError, Result};
use crate::token::{self, TokenResult};
use crate::types::{Authorization, CallbackParams, DriverId, FlowRequest, FlowState};
use crate::{BoxFuture, Driver, templated_url};

pub struct OneDriveDriver {
    endpoints: BTreeMap<String, Endpoints>,
    default_variant: String,
    scope: String,
    client: reqwest::Client,
}

impl OneDriveDriver {
    pub fn new(config: OneDriveConfig, client: reqwest::Client) -> Self {
        Self {
            endpoints: config.endpoint_table(),
            default_variant: config.default_variant.to_ascii_lowercase(),
            scope: config.scope,
            client,
        }
    }

    fn resolve(&self, variant: Option<&str>) -> Result<(String, &Endpoints)> {
        let variant = variant
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| self.default_variant.clone());
        match self.endpoints.get(&variant) {
            Some(endpoints) => Ok((variant, endpoints)),
            None => Err(FlowError::invalid_input(format!(
                "invalid variant: {variant}"
            ))),
        }
    }
}

impl Driver for OneDriveDriver {
    fn id(&self) -> DriverId {
        DriverId::OneDrive
    }

    fn build_authorize_url<'a>(
        &'a self,
        req: &'a FlowRequest,
    ) -> BoxFuture<'a, Result<Authorization>> {
        Box::pin(async move {
            let client_id = req.credentials.require_client_id()?;
            req.credentials.require_client_secret()?;
            let (variant, endpoints) = self.resolve(req.variant.as_deref())?;

            let url = templated_url(
                &endpoints.authorize_url,
                &[
                    ("client_id", client_id),
                    ("scope", self.scope.as_str()),
                    ("response_type", "code"),
                    ("redirect_uri", req.redirect_uri.as_str()),
                ],
            )?;
            Ok(Authorization::new(url, variant))
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
            let client_id = credentials.require_client_id()?;
            let client_secret = credentials.require_client_secret()?;
            let (variant, endpoints) = self.resolve(Some(state.variant.as_str()))?;

            debug!(variant = %variant, "exchanging onedrive code");
            let request = self.client.post(&endpoints.token_url).form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", state.redirect_uri.as_str()),
            ]);
            token::send(request, "onedrive token endpoint")
                .await?
                .json("onedrive token endpoint", token::oauth_rejection)
        })
    }
}
