//! Error/redirect unification
//!
//! The only place a flow outcome becomes an HTTP response. Interactive
//! callers (browser navigation) always land back on the UI with a
//! client-held cookie; programmatic callers always get JSON with a stable
//! `kind`. Tokens never appear in a URL.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use driver::{Authorization, DriverId, ErrorKind, FlowError, TokenResult};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

/// Delivered tokens for the UI to pick up once.
pub const RESOLVE_COOKIE: &str = "resolve_data";
/// Banner message for the UI.
pub const FLASH_COOKIE: &str = "flash";
/// Interactivity signal for the current browser session.
pub const SIGNAL_COOKIE: &str = "from_browser";

const RESOLVE_MAX_AGE_SECS: i64 = 120;
const FLASH_MAX_AGE_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Warning,
    Error,
    Info,
}

impl Severity {
    fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::PollingIncomplete => Severity::Info,
            ErrorKind::InvalidInput | ErrorKind::ExpiredOrMissingState => Severity::Warning,
            ErrorKind::ProviderRejected | ErrorKind::UpstreamUnavailable | ErrorKind::Internal => {
                Severity::Error
            }
        }
    }
}

#[derive(Serialize)]
struct Flash<'a> {
    #[serde(rename = "type")]
    severity: Severity,
    message: &'a str,
}

/// Machine-readable code in the `error` field of programmatic failures.
pub fn error_code(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidInput => "invalid_input",
        ErrorKind::ExpiredOrMissingState => "expired_or_missing_state",
        ErrorKind::ProviderRejected => "provider_rejected",
        ErrorKind::PollingIncomplete => "polling_incomplete",
        ErrorKind::UpstreamUnavailable => "upstream_unavailable",
        ErrorKind::Internal => "internal",
    }
}

#[derive(Debug, Clone)]
pub struct Presenter {
    ui_url: String,
    secure: bool,
}

impl Presenter {
    pub fn new(ui_url: impl Into<String>, secure: bool) -> Self {
        Self {
            ui_url: ui_url.into(),
            secure,
        }
    }

    /// Decide whether this request came from a browser navigation.
    ///
    /// An explicit `interactive` flag wins and refreshes the signal cookie.
    /// Without one, the signal cookie decides; absent both, the caller is
    /// programmatic. Unrecognised flag values count as absent.
    pub fn interactivity(&self, flag: Option<&str>, jar: CookieJar) -> (bool, CookieJar) {
        match flag.and_then(parse_flag) {
            Some(interactive) => {
                let cookie = self.client_cookie(SIGNAL_COOKIE, if interactive { "1" } else { "0" });
                (interactive, jar.add(cookie))
            }
            None => {
                if let Some(raw) = flag {
                    debug!(flag = %raw, "ignoring unrecognised interactive flag");
                }
                (self.signal(&jar), jar)
            }
        }
    }

    /// Interactivity from the signal cookie alone.
    pub fn signal(&self, jar: &CookieJar) -> bool {
        jar.get(SIGNAL_COOKIE)
            .and_then(|c| parse_flag(c.value()))
            .unwrap_or(false)
    }

    /// Response for a successfully built authorize URL.
    pub fn authorization(
        &self,
        driver: DriverId,
        authorization: &Authorization,
        interactive: bool,
        jar: CookieJar,
    ) -> Response {
        if interactive {
            return found(jar, authorization.url.as_str());
        }
        let mut body = json!({
            "authorization_url": authorization.url.as_str(),
            "driver": driver,
            "variant": authorization.variant,
        });
        // Polling drivers hand back their session id so API callers can poll
        if let Some(map) = body.as_object_mut() {
            for (key, value) in &authorization.aux {
                map.entry(key.clone()).or_insert_with(|| json!(value));
            }
        }
        (StatusCode::OK, jar, Json(body)).into_response()
    }

    /// Response for delivered tokens.
    pub fn tokens(
        &self,
        driver: DriverId,
        token: &TokenResult,
        client_id: Option<&str>,
        interactive: bool,
        jar: CookieJar,
    ) -> Response {
        if !interactive {
            return (StatusCode::OK, jar, Json(token)).into_response();
        }

        let mut data = match serde_json::to_value(token) {
            Ok(data) => data,
            Err(e) => return self.error(&FlowError::internal(e), interactive, jar),
        };
        if let Some(map) = data.as_object_mut() {
            map.insert("driver".into(), json!(driver));
            map.insert("client_id".into(), json!(client_id));
        }
        let mut resolve = self.client_cookie(RESOLVE_COOKIE, data.to_string());
        resolve.set_max_age(time::Duration::seconds(RESOLVE_MAX_AGE_SECS));
        let jar = self.flash(
            jar.add(resolve),
            Severity::Success,
            &format!("{driver} authorization complete"),
        );
        found(jar, &self.ui_url)
    }

    /// Turn a flow error into the response its audience expects.
    pub fn error(&self, err: &FlowError, interactive: bool, jar: CookieJar) -> Response {
        if interactive {
            let jar = self.flash(jar, Severity::for_kind(err.kind), &err.message);
            return found(jar, &self.ui_url);
        }

        if !err.is_terminal() {
            let body = json!({
                "kind": err.kind,
                "status": "pending",
                "provider_status": err.provider_status,
                "message": err.message,
            });
            return (StatusCode::OK, jar, Json(body)).into_response();
        }

        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": error_code(err.kind),
            "kind": err.kind,
            "message": err.message,
        });
        (status, jar, Json(body)).into_response()
    }

    fn flash(&self, jar: CookieJar, severity: Severity, message: &str) -> CookieJar {
        let value = serde_json::to_string(&Flash { severity, message }).unwrap_or_default();
        let mut cookie = self.client_cookie(FLASH_COOKIE, value);
        cookie.set_max_age(time::Duration::seconds(FLASH_MAX_AGE_SECS));
        jar.add(cookie)
    }

    /// Cookie the UI script is meant to read.
    fn client_cookie(&self, name: &'static str, value: impl Into<String>) -> Cookie<'static> {
        Cookie::build((name, value.into()))
            .path("/")
            .http_only(false)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn found(jar: CookieJar, location: &str) -> Response {
    (
        StatusCode::FOUND,
        jar,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;
    use serde_json::Value;

    fn presenter() -> Presenter {
        Presenter::new("/", true)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn set_cookies(response: &Response) -> Vec<Cookie<'static>> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| Cookie::parse_encoded(v.to_str().unwrap().to_string()).unwrap())
            .collect()
    }

    fn token() -> TokenResult {
        serde_json::from_value(json!({
            "access_token": "t1",
            "refresh_token": "r1",
            "expires_in": 3600
        }))
        .unwrap()
    }

    #[test]
    fn explicit_flag_overrides_and_refreshes_signal() {
        let p = presenter();
        let jar = CookieJar::new().add(Cookie::new(SIGNAL_COOKIE, "1"));

        let (interactive, jar) = p.interactivity(Some("false"), jar);
        assert!(!interactive);
        assert_eq!(jar.get(SIGNAL_COOKIE).unwrap().value(), "0");

        let (interactive, _) = p.interactivity(Some("1"), CookieJar::new());
        assert!(interactive);
    }

    #[test]
    fn signal_cookie_applies_without_flag() {
        let p = presenter();
        let jar = CookieJar::new().add(Cookie::new(SIGNAL_COOKIE, "true"));
        assert!(p.interactivity(None, jar).0);
        assert!(!p.interactivity(None, CookieJar::new()).0);
        assert!(!p.interactivity(Some("maybe"), CookieJar::new()).0);
    }

    #[tokio::test]
    async fn programmatic_error_has_status_and_kind() {
        let err = FlowError::rejected("InvalidCode: code expired");
        let response = presenter().error(&err, false, CookieJar::new());
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = body_json(response).await;
        assert_eq!(body["error"], "provider_rejected");
        assert_eq!(body["kind"], "ProviderRejected");
        assert_eq!(body["message"], "InvalidCode: code expired");
    }

    #[tokio::test]
    async fn programmatic_pending_is_ok_with_provider_status() {
        let response = presenter().error(&FlowError::pending("WaitLogin"), false, CookieJar::new());
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["kind"], "PollingIncomplete");
        assert_eq!(body["status"], "pending");
        assert_eq!(body["provider_status"], "WaitLogin");
    }

    #[test]
    fn interactive_error_redirects_with_flash() {
        let err = FlowError::invalid_input("invalid client_id");
        let response = presenter().error(&err, true, CookieJar::new());
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/");

        let cookies = set_cookies(&response);
        let flash = cookies.iter().find(|c| c.name() == FLASH_COOKIE).unwrap();
        let value: Value = serde_json::from_str(flash.value()).unwrap();
        assert_eq!(value["type"], "warning");
        assert_eq!(value["message"], "invalid client_id");
        assert_ne!(flash.http_only(), Some(true));
        assert_eq!(flash.path(), Some("/"));
    }

    #[test]
    fn severity_follows_kind() {
        assert_eq!(Severity::for_kind(ErrorKind::PollingIncomplete), Severity::Info);
        assert_eq!(
            Severity::for_kind(ErrorKind::ExpiredOrMissingState),
            Severity::Warning
        );
        assert_eq!(
            Severity::for_kind(ErrorKind::UpstreamUnavailable),
            Severity::Error
        );
    }

    #[test]
    fn interactive_tokens_ride_in_cookie_not_url() {
        let response = presenter().tokens(
            DriverId::OneDrive,
            &token(),
            Some("X"),
            true,
            CookieJar::new(),
        );
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(!location.contains("t1"));

        let cookies = set_cookies(&response);
        let resolve = cookies.iter().find(|c| c.name() == RESOLVE_COOKIE).unwrap();
        let data: Value = serde_json::from_str(resolve.value()).unwrap();
        assert_eq!(data["access_token"], "t1");
        assert_eq!(data["refresh_token"], "r1");
        assert_eq!(data["driver"], "onedrive");
        assert_eq!(data["client_id"], "X");
        assert!(data.get("client_secret").is_none());
        assert_eq!(resolve.max_age(), Some(time::Duration::seconds(120)));
        assert_eq!(resolve.secure(), Some(true));
    }

    #[tokio::test]
    async fn programmatic_tokens_are_plain_json() {
        let response =
            presenter().tokens(DriverId::Baidu, &token(), None, false, CookieJar::new());
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["access_token"], "t1");
        assert_eq!(body["expires_in"], 3600);
    }

    #[tokio::test]
    async fn programmatic_authorization_includes_aux() {
        let authz = Authorization::new(
            Url::parse("https://openapi.alipan.com/oauth/qrcode/s1").unwrap(),
            "qrcode",
        )
        .with_aux("sid", "s1");
        let response = presenter().authorization(DriverId::Aliyun, &authz, false, CookieJar::new());
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["authorization_url"], "https://openapi.alipan.com/oauth/qrcode/s1");
        assert_eq!(body["driver"], "aliyun");
        assert_eq!(body["variant"], "qrcode");
        assert_eq!(body["sid"], "s1");
    }
}
