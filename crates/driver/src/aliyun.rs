//! Aliyun Drive (alipan) open platform
//!
//! Two login variants share one token endpoint:
//! - `web` (default): templated authorize URL, the callback carries `code`
//! - `qrcode`: the provider assigns a QR page and a session id (`sid`) at
//!   authorize time; the callback polls the session status and exchanges
//!   the `authCode` it yields once the user has confirmed
//!
//! Errors come back as `{"code": "...", "message": "..."}`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AliyunConfig;
use crate::error::{FlowError, Result};
use crate::token::{self, TokenResult};
use crate::types::{
    AppCredentials, Authorization, CallbackParams, DriverId, FlowRequest, FlowState,
};
use crate::{BoxFuture, Driver, templated_url};

const WEB: &str = "web";
const QRCODE: &str = "qrcode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Web,
    QrCode,
}

impl Variant {
    fn parse(variant: Option<&str>) -> Result<Self> {
        match variant.map(str::to_ascii_lowercase).as_deref() {
            None | Some(WEB) => Ok(Variant::Web),
            Some(QRCODE) => Ok(Variant::QrCode),
            Some(other) => Err(FlowError::invalid_input(format!(
                "invalid variant: {other}"
            ))),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Variant::Web => WEB,
            Variant::QrCode => QRCODE,
        }
    }
}

#[derive(Deserialize)]
struct AliyunErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// `{code, message}` error payload rendered as `"code: message"`.
pub(crate) fn aliyun_rejection(body: &[u8]) -> Option<String> {
    let parsed: AliyunErrorBody = serde_json::from_slice(body).ok()?;
    Some(format!("{}: {}", parsed.code, parsed.message))
}

#[derive(Serialize)]
struct QrCodeRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    scopes: &'a [String],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrCodeResponse {
    qr_code_url: String,
    sid: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrCodeStatus {
    status: String,
    #[serde(default)]
    auth_code: Option<String>,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

pub struct AliyunDriver {
    config: AliyunConfig,
    client: reqwest::Client,
}

impl AliyunDriver {
    pub fn new(config: AliyunConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    async fn request_qrcode(&self, credentials: &AppCredentials) -> Result<QrCodeResponse> {
        let body = QrCodeRequest {
            client_id: credentials.require_client_id()?,
            client_secret: credentials.require_client_secret()?,
            scopes: &self.config.scopes,
        };
        let request = self.client.post(&self.config.qrcode_url).json(&body);
        token::send(request, "aliyun qrcode endpoint")
            .await?
            .json("aliyun qrcode endpoint", aliyun_rejection)
    }

    /// Resolve a QR session into an authorization code, or report that the
    /// user has not finished yet.
    async fn poll_qrcode(&self, sid: &str) -> Result<String> {
        if sid.is_empty()
            || !sid
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(FlowError::invalid_input("invalid sid"));
        }
        let url = self.config.qrcode_status_url.replace("{sid}", sid);
        let status: QrCodeStatus = token::send(self.client.get(&url), "aliyun qrcode status")
            .await?
            .json("aliyun qrcode status", aliyun_rejection)?;

        debug!(status = %status.status, "aliyun qrcode status");
        match status.status.as_str() {
            "WaitLogin" | "ScanSuccess" => Err(FlowError::pending(status.status.as_str())),
            "LoginSuccess" => status
                .auth_code
                .filter(|c| !c.is_empty())
                .ok_or_else(|| FlowError::upstream("aliyun qrcode status carried no authCode")),
            other => Err(FlowError::rejected(format!("Login failed: {other}"))),
        }
    }

    async fn token(&self, body: TokenRequest<'_>) -> Result<TokenResult> {
        let request = self.client.post(&self.config.token_url).json(&body);
        token::send(request, "aliyun token endpoint")
            .await?
            .json("aliyun token endpoint", aliyun_rejection)
    }
}

impl Driver for AliyunDriver {
    fn id(&self) -> DriverId {
        DriverId::Aliyun
    }

    fn build_authorize_url<'a>(
        &'a self,
        req: &'a FlowRequest,
    ) -> BoxFuture<'a, Result<Authorization>> {
        Box::pin(async move {
            let variant = Variant::parse(req.variant.as_deref())?;
            match variant {
                Variant::Web => {
                    let client_id = req.credentials.require_client_id()?;
                    req.credentials.require_client_secret()?;
                    let scope = self.config.scopes.join(",");
                    let url = templated_url(
                        &self.config.authorize_url,
                        &[
                            ("client_id", client_id),
                            ("redirect_uri", req.redirect_uri.as_str()),
                            ("scope", scope.as_str()),
                            ("response_type", "code"),
                            ("relogin", "true"),
                        ],
                    )?;
                    Ok(Authorization::new(url, variant.as_str()))
                }
                Variant::QrCode => {
                    let qr = self.request_qrcode(&req.credentials).await?;
                    let url = reqwest::Url::parse(&qr.qr_code_url).map_err(|e| {
                        FlowError::upstream(format!("aliyun returned a bad qrCodeUrl: {e}"))
                    })?;
                    info!("aliyun qrcode session issued");
                    Ok(Authorization::new(url, variant.as_str()).with_aux("sid", qr.sid))
                }
            }
        })
    }

    fn authorize_calls_provider(&self, req: &FlowRequest) -> bool {
        matches!(Variant::parse(req.variant.as_deref()), Ok(Variant::QrCode))
    }

    fn exchange_code<'a>(
        &'a self,
        params: &'a CallbackParams,
        state: &'a FlowState,
    ) -> BoxFuture<'a, Result<TokenResult>> {
        Box::pin(async move {
            let credentials = state.credentials();
            let client_id = credentials.require_client_id()?;
            let client_secret = credentials.require_client_secret()?;

            let code = match Variant::parse(Some(state.variant.as_str()))? {
                Variant::Web => params
                    .code()
                    .ok_or_else(|| FlowError::invalid_input("invalid code"))?
                    .to_string(),
                Variant::QrCode => {
                    let sid = params
                        .sid
                        .as_deref()
                        .or_else(|| state.aux.get("sid").map(String::as_str))
                        .ok_or_else(|| FlowError::invalid_input("invalid sid"))?;
                    self.poll_qrcode(sid).await?
                }
            };

            self.token(TokenRequest {
                client_id,
                client_secret,
                grant_type: "authorization_code",
                code: Some(&code),
                refresh_token: None,
            })
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
            self.token(TokenRequest {
                client_id: credentials.require_client_id()?,
                client_secret: credentials.require_client_secret()?,
                grant_type: "refresh_token",
                code: None,
                refresh_token: Some(refresh_token),
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{Calls, serve};
    use axum::Json;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn driver_at(base: &str) -> AliyunDriver {
        let config = AliyunConfig {
            token_url: format!("{base}/oauth/access_token"),
            qrcode_url: format!("{base}/oauth/authorize/qrcode"),
            qrcode_status_url: format!("{base}/oauth/qrcode/{{sid}}/status"),
            ..AliyunConfig::default()
        };
        AliyunDriver::new(config, reqwest::Client::new())
    }

    fn request(variant: Option<&str>, client_id: Option<&str>) -> FlowRequest {
        FlowRequest::new(
            DriverId::Aliyun,
            variant.map(String::from),
            AppCredentials::new(client_id.map(String::from), Some("S".into())),
            "https://relay.example.com/aliyun/callback".into(),
            false,
        )
        .unwrap()
    }

    fn state(variant: &str, sid: Option<&str>) -> FlowState {
        let mut authz = Authorization::new(
            reqwest::Url::parse("https://www.alipan.com/").unwrap(),
            variant,
        );
        if let Some(sid) = sid {
            authz = authz.with_aux("sid", sid);
        }
        FlowState::new(&request(Some(variant), Some("C")), &authz)
    }

    fn token_ok() -> Json<Value> {
        Json(json!({
            "token_type": "Bearer",
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 7200,
        }))
    }

    #[tokio::test]
    async fn web_authorize_url_is_templated() {
        let driver = AliyunDriver::new(AliyunConfig::default(), reqwest::Client::new());
        let authz = driver
            .build_authorize_url(&request(None, Some("C")))
            .await
            .unwrap();
        assert_eq!(authz.variant, "web");
        assert!(authz.aux.is_empty());
        assert!(authz.url.as_str().starts_with("https://www.alipan.com/o/oauth/authorize?"));

        let query: HashMap<_, _> = authz.url.query_pairs().into_owned().collect();
        assert_eq!(query["client_id"], "C");
        assert_eq!(query["scope"], "user:base,file:all:read,file:all:write");
        assert_eq!(query["relogin"], "true");
        assert_eq!(query["response_type"], "code");
    }

    #[tokio::test]
    async fn unknown_variant_is_invalid_input() {
        let driver = AliyunDriver::new(AliyunConfig::default(), reqwest::Client::new());
        let err = driver
            .build_authorize_url(&request(Some("tv"), Some("C")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.message, "invalid variant: tv");
    }

    #[test]
    fn only_qrcode_authorize_calls_provider() {
        let driver = AliyunDriver::new(AliyunConfig::default(), reqwest::Client::new());
        assert!(driver.authorize_calls_provider(&request(Some("qrcode"), Some("C"))));
        assert!(!driver.authorize_calls_provider(&request(Some("web"), Some("C"))));
        assert!(!driver.authorize_calls_provider(&request(None, Some("C"))));
    }

    #[tokio::test]
    async fn missing_client_id_fails_before_network() {
        let calls = Calls::default();
        let seen = calls.clone();
        let app = axum::Router::new().fallback(move || {
            let seen = seen.clone();
            async move {
                seen.hit();
                StatusCode::OK
            }
        });
        let base = serve(app).await;
        let driver = driver_at(&base);

        for variant in [None, Some("qrcode")] {
            let err = driver
                .build_authorize_url(&request(variant, None))
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidInput);
            assert_eq!(err.message, "invalid client_id");
        }
        assert_eq!(calls.count(), 0);
    }

    #[tokio::test]
    async fn web_exchange_error_is_code_and_message() {
        let app = axum::Router::new().route(
            "/oauth/access_token",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"code": "InvalidCode", "message": "code expired"})),
                )
            }),
        );
        let driver = driver_at(&serve(app).await);

        let params = CallbackParams {
            code: Some("stale".into()),
            ..Default::default()
        };
        let err = driver
            .exchange_code(&params, &state("web", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderRejected);
        assert_eq!(err.message, "InvalidCode: code expired");
    }

    #[tokio::test]
    async fn web_exchange_posts_json() {
        let app = axum::Router::new().route(
            "/oauth/access_token",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["grant_type"], "authorization_code");
                assert_eq!(body["code"], "abc");
                assert_eq!(body["client_id"], "C");
                assert_eq!(body["client_secret"], "S");
                assert!(body.get("refresh_token").is_none());
                token_ok()
            }),
        );
        let driver = driver_at(&serve(app).await);

        let params = CallbackParams {
            code: Some("abc".into()),
            ..Default::default()
        };
        let token = driver
            .exchange_code(&params, &state("web", None))
            .await
            .unwrap();
        assert_eq!(token.access_token, "at");
        assert_eq!(token.expires_in, Some(7200));
        assert_eq!(token.extra["token_type"], "Bearer");
    }

    #[tokio::test]
    async fn qrcode_authorize_stores_sid() {
        let app = axum::Router::new().route(
            "/oauth/authorize/qrcode",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["client_id"], "C");
                assert_eq!(body["scopes"][1], "file:all:read");
                Json(json!({
                    "qrCodeUrl": "https://openapi.alipan.com/oauth/qrcode/sid-1",
                    "sid": "sid-1",
                }))
            }),
        );
        let driver = driver_at(&serve(app).await);

        let authz = driver
            .build_authorize_url(&request(Some("qrcode"), Some("C")))
            .await
            .unwrap();
        assert_eq!(authz.variant, "qrcode");
        assert_eq!(authz.url.as_str(), "https://openapi.alipan.com/oauth/qrcode/sid-1");
        assert_eq!(authz.aux["sid"], "sid-1");
    }

    #[tokio::test]
    async fn qrcode_waiting_is_pending_and_skips_token_call() {
        let token_calls = Calls::default();
        let seen = token_calls.clone();
        let app = axum::Router::new()
            .route(
                "/oauth/qrcode/{sid}/status",
                get(|| async { Json(json!({"status": "ScanSuccess"})) }),
            )
            .route(
                "/oauth/access_token",
                post(move || {
                    let seen = seen.clone();
                    async move {
                        seen.hit();
                        token_ok()
                    }
                }),
            );
        let driver = driver_at(&serve(app).await);

        let err = driver
            .exchange_code(&CallbackParams::default(), &state("qrcode", Some("sid-1")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PollingIncomplete);
        assert_eq!(err.provider_status.as_deref(), Some("ScanSuccess"));
        assert_eq!(token_calls.count(), 0);
    }

    #[tokio::test]
    async fn qrcode_login_success_exchanges_auth_code() {
        let app = axum::Router::new()
            .route(
                "/oauth/qrcode/{sid}/status",
                get(|Path(sid): Path<String>| async move {
                    assert_eq!(sid, "from-callback");
                    Json(json!({"status": "LoginSuccess", "authCode": "ac-9"}))
                }),
            )
            .route(
                "/oauth/access_token",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["code"], "ac-9");
                    token_ok()
                }),
            );
        let driver = driver_at(&serve(app).await);

        // sid on the callback wins over the one stored at authorize time
        let params = CallbackParams {
            sid: Some("from-callback".into()),
            ..Default::default()
        };
        let token = driver
            .exchange_code(&params, &state("qrcode", Some("stored")))
            .await
            .unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn qrcode_expired_is_rejection() {
        let app = axum::Router::new().route(
            "/oauth/qrcode/{sid}/status",
            get(|| async { Json(json!({"status": "QRCodeExpired"})) }),
        );
        let driver = driver_at(&serve(app).await);

        let err = driver
            .exchange_code(&CallbackParams::default(), &state("qrcode", Some("sid-1")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProviderRejected);
        assert_eq!(err.message, "Login failed: QRCodeExpired");
    }

    #[tokio::test]
    async fn refresh_sends_refresh_grant() {
        let app = axum::Router::new().route(
            "/oauth/access_token",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["grant_type"], "refresh_token");
                assert_eq!(body["refresh_token"], "old");
                assert!(body.get("code").is_none());
                token_ok()
            }),
        );
        let driver = driver_at(&serve(app).await);

        let creds = AppCredentials::new(Some("C".into()), Some("S".into()));
        let token = driver.refresh("old", &creds).await.unwrap();
        assert_eq!(token.access_token, "at");
    }
}
