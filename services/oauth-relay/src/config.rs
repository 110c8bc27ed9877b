//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Secrets (the state sealing key, the Baidu platform app secret) come from
//! env vars or `*_file` paths, never from the TOML itself.

use common::Secret;
use driver::ProvidersConfig;
use reqwest::Url;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Upper bound for the flow state lifetime: one authorize round trip.
pub const MAX_STATE_TTL_SECS: u64 = 3600;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// HTTP listener and deployment settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Externally visible base URL, used for default redirect URIs
    pub base_url: String,
    /// Where interactive callers land after a flow ends
    #[serde(default = "default_ui_url")]
    pub ui_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Flow state carrier settings
#[derive(Debug, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_ttl")]
    pub ttl_secs: u64,
    /// Path to a file holding the sealing secret (alternative to RELAY_STATE_SECRET)
    #[serde(default)]
    pub secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub secret: Option<Secret<String>>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_state_ttl(),
            secret_file: None,
            secret: None,
        }
    }
}

fn default_ui_url() -> String {
    "/".to_string()
}

fn default_timeout() -> u64 {
    15
}

fn default_max_connections() -> usize {
    1000
}

fn default_state_ttl() -> u64 {
    600
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Env overrides: `MAIN_URL` (base_url), `RELAY_STATE_SECRET`,
    /// `BAIDU_CLIENT_ID`, `BAIDU_CLIENT_SECRET`.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Some(url) = env_value("MAIN_URL") {
            config.server.base_url = url;
        }
        config.server.base_url = config.server.base_url.trim_end_matches('/').to_string();

        config.validate()?;

        config.state.secret = resolve_secret("RELAY_STATE_SECRET", config.state.secret_file.as_deref())?;

        if let Some(id) = env_value("BAIDU_CLIENT_ID") {
            config.providers.baidu.client_id = Some(id);
        }
        let baidu_secret_file = config.providers.baidu.client_secret_file.clone().map(PathBuf::from);
        config.providers.baidu.client_secret =
            resolve_secret("BAIDU_CLIENT_SECRET", baidu_secret_file.as_deref())?;

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        match Url::parse(&self.server.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(common::Error::invalid(
                    "server.base_url",
                    format!(
                        "must be an absolute http:// or https:// URL, got: {}",
                        self.server.base_url
                    ),
                ));
            }
        }
        if self.server.timeout_secs == 0 {
            return Err(common::Error::invalid(
                "server.timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::invalid(
                "server.max_connections",
                "must be greater than 0",
            ));
        }
        if self.state.ttl_secs == 0 || self.state.ttl_secs > MAX_STATE_TTL_SECS {
            return Err(common::Error::invalid(
                "state.ttl_secs",
                format!("must be between 1 and {MAX_STATE_TTL_SECS}"),
            ));
        }
        Ok(())
    }

    /// Path component of `base_url` without a trailing slash ("" at the root).
    pub fn base_path(&self) -> String {
        Url::parse(&self.server.base_url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    pub fn is_https(&self) -> bool {
        self.server.base_url.starts_with("https://")
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-relay.toml")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Env var takes precedence over the file. An empty file yields no secret.
fn resolve_secret(env_key: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Some(value) = env_value(env_key) {
        return Ok(Some(Secret::new(value)));
    }
    let Some(path) = file else {
        return Ok(None);
    };
    let value = std::fs::read_to_string(path).map_err(|source| common::Error::SecretFile {
        path: path.to_path_buf(),
        source,
    })?;
    let value = value.trim().to_owned();
    Ok((!value.is_empty()).then(|| Secret::new(value)))
}
