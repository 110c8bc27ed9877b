//! Per-driver HTTP routes
//!
//! Handlers only parse input, build a `FlowContext` and hand off to the
//! engine; every outcome goes back out through the presenter.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use driver::types::non_empty;
use driver::{AppCredentials, CallbackParams, DriverId, FlowError, FlowRequest};
use serde::Deserialize;
use tracing::instrument;

use crate::AppState;
use crate::flow::FlowContext;

#[derive(Debug, Default, Deserialize)]
pub struct PrepareQuery {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(alias = "app_type")]
    pub variant: Option<String>,
    pub redirect_uri: Option<String>,
    pub interactive: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(alias = "refresh_ui")]
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

fn bad_query(rejection: QueryRejection) -> FlowError {
    FlowError::invalid_input(format!("invalid query: {}", rejection.body_text()))
}

/// `GET /{driver}/prepare` (also `/requests` and `/login`)
#[instrument(skip_all, fields(driver = %name))]
pub async fn prepare(
    State(app): State<AppState>,
    Path(name): Path<String>,
    query: Result<Query<PrepareQuery>, QueryRejection>,
    jar: CookieJar,
) -> Response {
    let query = query.map(|Query(q)| q);
    start(&app, &name, query, jar).await
}

/// `GET /aliyun/qrlogin`: the Aliyun flow with the QR-code variant forced.
#[instrument(skip_all)]
pub async fn qrlogin(
    State(app): State<AppState>,
    query: Result<Query<PrepareQuery>, QueryRejection>,
    jar: CookieJar,
) -> Response {
    let query = query.map(|Query(q)| PrepareQuery {
        variant: Some("qrcode".into()),
        ..q
    });
    start(&app, DriverId::Aliyun.as_str(), query, jar).await
}

async fn start(
    app: &AppState,
    name: &str,
    query: Result<PrepareQuery, QueryRejection>,
    jar: CookieJar,
) -> Response {
    let flag = query.as_ref().ok().and_then(|q| q.interactive.as_deref());
    let (interactive, jar) = app.presenter.interactivity(flag, jar);

    let driver = match name.parse::<DriverId>() {
        Ok(driver) => driver,
        Err(err) => return app.presenter.error(&err, interactive, jar),
    };
    let ctx = FlowContext::new(driver, interactive).at_route(name);

    let request = query.map_err(bad_query).and_then(|q| {
        let redirect_uri = non_empty(q.redirect_uri)
            .unwrap_or_else(|| default_redirect_uri(&app.base_url, &ctx.route));
        FlowRequest::new(
            driver,
            q.variant,
            AppCredentials::new(q.client_id, q.client_secret),
            redirect_uri,
            interactive,
        )
    });
    let request = match request {
        Ok(request) => request,
        Err(err) => return app.presenter.error(&err, interactive, jar),
    };

    let (jar, result) = app.engine.begin(&ctx, request, jar).await;
    match result {
        Ok(authorization) => app
            .presenter
            .authorization(driver, &authorization, ctx.interactive, jar),
        Err(err) => app.presenter.error(&err, ctx.interactive, jar),
    }
}

/// `GET /{driver}/callback`
///
/// Interactivity comes from the carried state; the signal cookie is only a
/// fallback for when the state is gone.
#[instrument(skip_all, fields(driver = %name))]
pub async fn callback(
    State(app): State<AppState>,
    Path(name): Path<String>,
    query: Result<Query<CallbackParams>, QueryRejection>,
    jar: CookieJar,
) -> Response {
    let signal = app.presenter.signal(&jar);

    let driver = match name.parse::<DriverId>() {
        Ok(driver) => driver,
        Err(err) => return app.presenter.error(&err, signal, jar),
    };
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => return app.presenter.error(&bad_query(rejection), signal, jar),
    };

    let ctx = FlowContext::new(driver, signal).at_route(&name);
    let completion = app.engine.complete(&ctx, &params, jar).await;
    let interactive = completion
        .state
        .as_ref()
        .map(|state| state.interactive)
        .unwrap_or(signal);
    let client_id = completion
        .state
        .as_ref()
        .and_then(|state| state.client_id.as_deref());

    match &completion.result {
        Ok(token) => app
            .presenter
            .tokens(driver, token, client_id, interactive, completion.jar),
        Err(err) => app.presenter.error(err, interactive, completion.jar),
    }
}

/// `GET /{driver}/refresh` (also `/token`). Always answers in JSON.
#[instrument(skip_all, fields(driver = %name))]
pub async fn refresh(
    State(app): State<AppState>,
    Path(name): Path<String>,
    query: Result<Query<RefreshQuery>, QueryRejection>,
    jar: CookieJar,
) -> Response {
    let driver = match name.parse::<DriverId>() {
        Ok(driver) => driver,
        Err(err) => return app.presenter.error(&err, false, jar),
    };
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => return app.presenter.error(&bad_query(rejection), false, jar),
    };

    let ctx = FlowContext::new(driver, false);
    let credentials = AppCredentials::new(query.client_id, query.client_secret);
    let refresh_token = query.refresh_token.unwrap_or_default();
    match app
        .engine
        .refresh_only(&ctx, &refresh_token, &credentials)
        .await
    {
        Ok(token) => app.presenter.tokens(driver, &token, None, false, jar),
        Err(err) => app.presenter.error(&err, false, jar),
    }
}

/// Callback URL on the route the flow started on, so the flow cookie's
/// path covers it.
pub fn default_redirect_uri(base_url: &str, route: &str) -> String {
    format!("{base_url}/{route}/callback")
}
