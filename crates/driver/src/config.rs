//! Static per-provider configuration
//!
//! Every field has a default matching the provider's public endpoints, so an
//! empty `[providers]` table is valid. Overrides exist mainly to point a
//! driver at a staging or mock server.

use std::collections::BTreeMap;

use common::Secret;
use serde::Deserialize;

/// All provider sections, loaded once at start-up and never mutated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub onedrive: OneDriveConfig,
    pub aliyun: AliyunConfig,
    pub baidu: BaiduConfig,
    pub quark: QuarkConfig,
}

/// Authorize/token endpoint pair for one OneDrive national cloud.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Endpoints {
    pub authorize_url: String,
    pub token_url: String,
}

impl Endpoints {
    fn new(authorize_url: &str, token_url: &str) -> Self {
        Self {
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OneDriveConfig {
    /// Variant used when the caller names none
    pub default_variant: String,
    pub scope: String,
    /// Per-variant overrides, merged over the built-in table
    pub variants: BTreeMap<String, Endpoints>,
}

impl Default for OneDriveConfig {
    fn default() -> Self {
        Self {
            default_variant: "global".to_string(),
            scope: "offline_access Files.ReadWrite.All".to_string(),
            variants: BTreeMap::new(),
        }
    }
}

impl OneDriveConfig {
    /// Built-in national cloud endpoints with configured overrides applied.
    pub fn endpoint_table(&self) -> BTreeMap<String, Endpoints> {
        let mut table = BTreeMap::from([
            (
                "global".to_string(),
                Endpoints::new(
                    "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                    "https://login.microsoftonline.com/common/oauth2/v2.0/token",
                ),
            ),
            (
                "cn".to_string(),
                Endpoints::new(
                    "https://login.chinacloudapi.cn/common/oauth2/v2.0/authorize",
                    "https://microsoftgraph.chinacloudapi.cn/common/oauth2/v2.0/token",
                ),
            ),
            (
                "de".to_string(),
                Endpoints::new(
                    "https://login.microsoftonline.de/common/oauth2/v2.0/authorize",
                    "https://graph.microsoft.de/common/oauth2/v2.0/token",
                ),
            ),
            (
                "us".to_string(),
                Endpoints::new(
                    "https://login.microsoftonline.us/common/oauth2/v2.0/authorize",
                    "https://graph.microsoft.us/common/oauth2/v2.0/token",
                ),
            ),
        ]);
        for (variant, endpoints) in &self.variants {
            table.insert(variant.to_ascii_lowercase(), endpoints.clone());
        }
        table
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AliyunConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub qrcode_url: String,
    /// `{sid}` is replaced with the session id from the QR step
    pub qrcode_status_url: String,
    pub scopes: Vec<String>,
}

impl Default for AliyunConfig {
    fn default() -> Self {
        Self {
            authorize_url: "https://www.alipan.com/o/oauth/authorize".to_string(),
            token_url: "https://openapi.aliyundrive.com/oauth/access_token".to_string(),
            qrcode_url: "https://openapi.aliyundrive.com/oauth/authorize/qrcode".to_string(),
            qrcode_status_url: "https://openapi.aliyundrive.com/oauth/qrcode/{sid}/status"
                .to_string(),
            scopes: vec![
                "user:base".to_string(),
                "file:all:read".to_string(),
                "file:all:write".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaiduConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub scope: String,
    /// Platform app id (overridden by BAIDU_CLIENT_ID)
    pub client_id: Option<String>,
    /// Path to a file holding the platform app secret
    pub client_secret_file: Option<String>,
    /// Platform app secret, resolved from env or `client_secret_file`.
    /// Never read from TOML directly.
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
}

impl Default for BaiduConfig {
    fn default() -> Self {
        Self {
            authorize_url: "https://openapi.baidu.com/oauth/2.0/authorize".to_string(),
            token_url: "https://openapi.baidu.com/oauth/2.0/token".to_string(),
            scope: "basic,netdisk".to_string(),
            client_id: None,
            client_secret_file: None,
            client_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuarkConfig {
    pub auth_url_endpoint: String,
    pub exchange_url: String,
    pub refresh_url: String,
    pub app_id: String,
    pub auth_type: u32,
}

impl Default for QuarkConfig {
    fn default() -> Self {
        Self {
            auth_url_endpoint: "https://oauth.fnnas.com/api/v1/oauth/getAuthUrl".to_string(),
            exchange_url: "https://oauth.fnnas.com/api/v1/oauth/exchangeToken".to_string(),
            refresh_url: "https://oauth.fnnas.com/api/v1/oauth/refreshToken".to_string(),
            app_id: "com.trim.cloudstorage".to_string(),
            auth_type: 4,
        }
    }
}
