//! OAuth Relay
//!
//! Single-binary Rust service that:
//! 1. Starts an authorization code flow for a cloud-storage provider
//! 2. Carries the flow state across the provider redirect in a sealed cookie
//! 3. Exchanges the callback for tokens and hands them back to the caller

mod carrier;
mod config;
mod engine;
mod error;
mod flow;
mod metrics;
mod present;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use driver::{DriverId, Drivers};
use rand::RngExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::carrier::Carrier;
use crate::config::Config;
use crate::engine::Engine;
use crate::present::Presenter;

/// Time allowed for in-flight requests to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
    presenter: Presenter,
    /// Externally visible base URL without a trailing slash
    base_url: String,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

impl AppState {
    fn new(config: &Config, state_secret: &[u8], prometheus: PrometheusHandle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.server.timeout_secs))
            .connect_timeout(CONNECT_TIMEOUT.min(Duration::from_secs(config.server.timeout_secs)))
            .build()
            .context("failed to build HTTP client")?;

        let carrier = Carrier::new(
            state_secret,
            config.state.ttl_secs,
            config.base_path(),
            config.is_https(),
        );

        Ok(Self {
            engine: Arc::new(Engine::new(
                Drivers::new(&config.providers, client),
                carrier,
            )),
            presenter: Presenter::new(config.server.ui_url.clone(), config.is_https()),
            base_url: config.server.base_url.clone(),
            started_at: Instant::now(),
            prometheus,
        })
    }
}

/// Build the axum router with all routes and shared state.
///
/// Routes are mounted at the root; a reverse proxy serving `base_url` under a
/// path prefix is expected to strip it.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ping", get(ping_handler))
        .route("/aliyun/qrlogin", get(routes::qrlogin))
        .route("/{driver}/prepare", get(routes::prepare))
        .route("/{driver}/requests", get(routes::prepare))
        .route("/{driver}/login", get(routes::prepare))
        .route("/{driver}/callback", get(routes::callback))
        .route("/{driver}/refresh", get(routes::refresh))
        .route("/{driver}/token", get(routes::refresh))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting oauth-relay");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.server.base_url,
        ttl_secs = config.state.ttl_secs,
        timeout_secs = config.server.timeout_secs,
        "configuration loaded"
    );

    let state_secret = match &config.state.secret {
        Some(secret) => secret.expose().as_bytes().to_vec(),
        None => {
            warn!(
                "no state secret configured, generated an ephemeral one; \
                 flows only complete on this instance and not across restarts"
            );
            let mut bytes = [0u8; 32];
            rand::rng().fill(&mut bytes);
            bytes.to_vec()
        }
    };

    let app_state = AppState::new(&config, &state_secret, prometheus_handle)?;
    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race it against the timer.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Health endpoint: status, uptime and the drivers this instance serves.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let drivers: Vec<_> = DriverId::ALL
        .iter()
        .map(|&id| {
            serde_json::json!({
                "name": id,
                "refresh": state.engine.supports_refresh(id),
            })
        })
        .collect();

    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "drivers": drivers,
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn ping_handler() -> &'static str {
    "pong"
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
