//! Quark via the fnOS OAuth bridge
//!
//! The bridge assigns the authorize URL: `getAuthUrl` returns a URL with a
//! nonce baked in, the browser comes back with that `nonce`, and
//! `exchangeToken` trades it for tokens. Every reply is wrapped in
//! `{code, msg, data}` where `code != 0` means the bridge refused.
//!
//! Quark signs requests rather than using bearer tokens, so `appId` and
//! `signKey` are passed through as `app_id` / `sign_key`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::QuarkConfig;
use crate::error::{FlowError, Result};
use crate::token::{self, TokenResult};
use crate::types::{
    AppCredentials, Authorization, CallbackParams, DriverId, FlowRequest, FlowState,
};
use crate::{BoxFuture, Driver};

const VARIANT: &str = "fnos";

/// `data` stays untyped until `code` says the call succeeded; refusals may
/// carry a `data` object of any shape.
#[derive(Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

impl Envelope {
    fn into_data<T: DeserializeOwned>(self, what: &str) -> Result<T> {
        if self.code != 0 {
            return Err(FlowError::rejected(refusal(self.code, self.msg)));
        }
        if self.data.is_null() {
            return Err(FlowError::upstream(format!("{what} returned no data")));
        }
        serde_json::from_value(self.data).map_err(|e| {
            FlowError::upstream(format!("{what} returned an unreadable body: {e}"))
        })
    }
}

fn refusal(code: i64, msg: Option<String>) -> String {
    msg.filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("code {code}"))
}

#[derive(Deserialize)]
struct Refusal {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
}

/// Envelope with a non-zero code, rendered as its `msg`.
fn quark_rejection(body: &[u8]) -> Option<String> {
    let parsed: Refusal = serde_json::from_slice(body).ok()?;
    (parsed.code != 0).then(|| refusal(parsed.code, parsed.msg))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthUrlRequest<'a> {
    auth_type: u32,
    grant_type: &'a str,
    redirect_url_to_frontend: &'a str,
    trim_app_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthUrlData {
    auth_url_with_nonce: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    auth_type: u32,
    nonce: &'a str,
    trim_app_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    auth_type: u32,
    refresh_token: &'a str,
    trim_app_id: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    token_info: QuarkToken,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuarkToken {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    sign_key: Option<String>,
}

impl From<QuarkToken> for TokenResult {
    fn from(t: QuarkToken) -> Self {
        let mut extra = serde_json::Map::new();
        if let Some(app_id) = t.app_id {
            extra.insert("app_id".into(), app_id.into());
        }
        if let Some(sign_key) = t.sign_key {
            extra.insert("sign_key".into(), sign_key.into());
        }
        TokenResult {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_in: t.expires_in,
            extra,
        }
    }
}

pub struct QuarkDriver {
    config: QuarkConfig,
    client: reqwest::Client,
}

impl QuarkDriver {
    pub fn new(config: QuarkConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        what: &str,
    ) -> Result<T> {
        let request = self.client.post(url).json(body);
        token::send(request, what)
            .await?
            .json::<Envelope>(what, quark_rejection)?
            .into_data(what)
    }
}

impl Driver for QuarkDriver {
    fn id(&self) -> DriverId {
        DriverId::Quark
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
            let body = AuthUrlRequest {
                auth_type: self.config.auth_type,
                grant_type: "authorization_code",
                redirect_url_to_frontend: &req.redirect_uri,
                trim_app_id: &self.config.app_id,
            };
            let data: AuthUrlData = self
                .call(&self.config.auth_url_endpoint, &body, "quark getAuthUrl")
                .await?;
            let raw = data
                .auth_url_with_nonce
                .filter(|u| !u.is_empty())
                .ok_or_else(|| FlowError::upstream("quark getAuthUrl returned no authUrlWithNonce"))?;
            let url = reqwest::Url::parse(&raw)
                .map_err(|e| FlowError::upstream(format!("quark returned a bad auth URL: {e}")))?;
            info!("quark authorize URL issued");
            Ok(Authorization::new(url, VARIANT))
        })
    }

    fn authorize_calls_provider(&self, _req: &FlowRequest) -> bool {
        true
    }

    fn exchange_code<'a>(
        &'a self,
        params: &'a CallbackParams,
        _state: &'a FlowState,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        Box::pin(async move {
            let nonce = params
                .nonce
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .ok_or_else(|| FlowError::invalid_input("invalid nonce"))?;
            let body = ExchangeRequest {
                auth_type: self.config.auth_type,
                nonce,
                trim_app_id: &self.config.app_id,
            };
            let token: QuarkToken = self
                .call(&self.config.exchange_url, &body, "quark exchangeToken")
                .await?;
            Ok(token.into())
        })
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
        _credentials: &'a AppCredentials,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        Box::pin(async move {
            let body = RefreshRequest {
                auth_type: self.config.auth_type,
                refresh_token,
                trim_app_id: &self.config.app_id,
            };
            let data: RefreshData = self
                .call(&self.config.refresh_url, &body, "quark refreshToken")
                .await?;
            Ok(data.token_info.into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{Calls, serve};
    use axum::Json;
    use axum::routing::post;
    use serde_json::{Value, json};

    fn driver_at(base: &str) -> QuarkDriver {
        let config = QuarkConfig {
            auth_url_endpoint: format!("{base}/getAuthUrl"),
            exchange_url: format!("{base}/exchangeToken"),
            refresh_url: format!("{base}/refreshToken"),
            ..QuarkConfig::default()
        };
        QuarkDriver::new(config, reqwest::Client::new())
    }

    fn request() -> FlowRequest {
        FlowRequest::new(
            DriverId::Quark,
            None,
            AppCredentials::default(),
            "https://relay.example.com/quark/callback".into(),
            true,
        )
        .unwrap()
    }

    fn state() -> FlowState {
        let authz = Authorization::new(reqwest::Url::parse("https://oauth.fnnas.com/").unwrap(), VARIANT);
        FlowState::new(&request(), &authz)
    }

    #[tokio::test]
    async fn authorize_url_comes_from_bridge() {
        let app = axum::Router::new().route(
            "/getAuthUrl",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["authType"], 4);
                assert_eq!(body["trimAppId"], "com.trim.cloudstorage");
                assert_eq!(body["redirectUrlToFrontend"], "https://relay.example.com/quark/callback");
                Json(json!({
                    "code": 0,
                    "data": {"authUrlWithNonce": "https://oauth.fnnas.com/authorize?nonce=n-1"},
                }))
            }),
        );
        let driver = driver_at(&serve(app).await);

        let authz = driver.build_authorize_url(&request()).await.unwrap();
        assert_eq!(authz.url.as_str(), "https://oauth.fnnas.com/authorize?nonce=n-1");
        assert_eq!(authz.variant, VARIANT);
    }

    #[tokio::test]
    async fn bridge_refusal_is_rejection_with_msg() {
        let app = axum::Router::new().route(
            "/getAuthUrl",
            post(|| async { Json(json!({"code": 40001, "msg": "app disabled"})) }),
        );
        let driver = driver_at(&serve(app).await);

        let err = driver.build_authorize_url(&request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderRejected);
        assert_eq!(err.message, "app disabled");
    }

    #[tokio::test]
    async fn refusal_with_data_object_is_still_rejection() {
        let app = axum::Router::new().route(
            "/exchangeToken",
            post(|| async {
                Json(json!({"code": 40001, "msg": "nonce expired", "data": {}}))
            }),
        );
        let driver = driver_at(&serve(app).await);

        let params = CallbackParams {
            nonce: Some("n-1".into()),
            ..Default::default()
        };
        let err = driver.exchange_code(&params, &state()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderRejected);
        assert_eq!(err.message, "nonce expired");
    }

    #[tokio::test]
    async fn success_without_data_is_upstream_unavailable() {
        let app = axum::Router::new().route(
            "/getAuthUrl",
            post(|| async { Json(json!({"code": 0, "msg": "ok"})) }),
        );
        let driver = driver_at(&serve(app).await);

        let err = driver.build_authorize_url(&request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn unknown_variant_is_invalid_input() {
        let calls = Calls::default();
        let seen = calls.clone();
        let app = axum::Router::new().fallback(move || {
            seen.hit();
            async { Json(json!({"code": 0})) }
        });
        let driver = driver_at(&serve(app).await);

        let mut req = request();
        req.variant = Some("bogus".into());
        let err = driver.build_authorize_url(&req).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.message, "invalid variant: bogus");
        assert_eq!(calls.count(), 0);

        req.variant = Some("FNOS".into());
        assert!(driver.authorize_calls_provider(&req));
    }

    #[tokio::test]
    async fn unreachable_bridge_is_upstream_unavailable() {
        let driver = driver_at("http://127.0.0.1:1");
        let err = driver.build_authorize_url(&request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn exchange_passes_sign_key_through() {
        let app = axum::Router::new().route(
            "/exchangeToken",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["nonce"], "n-1");
                Json(json!({
                    "code": 0,
                    "data": {
                        "accessToken": "qa",
                        "refreshToken": "qr",
                        "expiresIn": 86400,
                        "appId": "app-7",
                        "signKey": "sk-7",
                    },
                }))
            }),
        );
        let driver = driver_at(&serve(app).await);

        let params = CallbackParams {
            nonce: Some("n-1".into()),
            ..Default::default()
        };
        let token = driver.exchange_code(&params, &state()).await.unwrap();
        assert_eq!(token.access_token, "qa");
        assert_eq!(token.expires_in, Some(86400));
        assert_eq!(token.extra["app_id"], "app-7");
        assert_eq!(token.extra["sign_key"], "sk-7");
    }

    #[tokio::test]
    async fn missing_nonce_is_invalid_input() {
        let driver = driver_at("http://127.0.0.1:1");
        let err = driver
            .exchange_code(&CallbackParams::default(), &state())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.message, "invalid nonce");
    }

    #[tokio::test]
    async fn refresh_reads_token_info() {
        let app = axum::Router::new().route(
            "/refreshToken",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["refreshToken"], "qr");
                Json(json!({
                    "code": 0,
                    "data": {"tokenInfo": {"accessToken": "qa2", "refreshToken": "qr2", "expiresIn": 86400}},
                }))
            }),
        );
        let driver = driver_at(&serve(app).await);

        let token = driver.refresh("qr", &AppCredentials::default()).await.unwrap();
        assert_eq!(token.access_token, "qa2");
        assert_eq!(token.refresh_token.as_deref(), Some("qr2"));
    }
}
