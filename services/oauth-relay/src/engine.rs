//! Token exchange engine
//!
//! Drives one flow through its phases. Drivers do the provider work, the
//! carrier holds state between the two halves, and `flow::handle_event`
//! decides what happens to the state cookie after each step. The engine
//! only annotates errors (driver, step); it never changes their kind.

use std::time::Instant;

use axum_extra::extract::cookie::CookieJar;
use driver::{
    AppCredentials, Authorization, CallbackParams, Driver, DriverId, Drivers, FlowError,
    FlowRequest, FlowState, FlowStep, TokenResult,
};
use tracing::{info, instrument, warn};

use crate::carrier::Carrier;
use crate::flow::{FlowAction, FlowContext, FlowEvent, FlowPhase, handle_event};
use crate::metrics;

/// Result of a callback: the response jar plus whatever state was read.
pub struct Completion {
    pub jar: CookieJar,
    pub result: driver::Result<TokenResult>,
    /// State loaded from the carrier, absent when it was missing or invalid
    pub state: Option<FlowState>,
}

pub struct Engine {
    drivers: Drivers,
    carrier: Carrier,
}

impl Engine {
    pub fn new(drivers: Drivers, carrier: Carrier) -> Self {
        Self { drivers, carrier }
    }

    pub fn supports_refresh(&self, id: DriverId) -> bool {
        self.drivers.get(id).supports_refresh()
    }

    /// Build the authorize URL and persist the flow state.
    #[instrument(skip_all, fields(driver = %ctx.driver, request_id = %ctx.request_id))]
    pub async fn begin(
        &self,
        ctx: &FlowContext,
        req: FlowRequest,
        jar: CookieJar,
    ) -> (CookieJar, driver::Result<Authorization>) {
        let id = ctx.driver;
        let driver = self.drivers.get(id);
        let started = Instant::now();
        let built = driver.build_authorize_url(&req).await;
        if driver.authorize_calls_provider(&req) {
            metrics::record_provider_call(id, FlowStep::Authorize, started.elapsed().as_secs_f64());
        }

        let (jar, result) = match built {
            Ok(authorization) => {
                let (_, action) = handle_event(FlowPhase::Begin, FlowEvent::AuthorizeBuilt);
                let state = FlowState::new(&req, &authorization);
                match self.apply(action, jar.clone(), ctx, &state) {
                    Ok(jar) => {
                        info!(variant = %authorization.variant, "flow started");
                        (jar, Ok(authorization))
                    }
                    Err(err) => (jar, Err(err)),
                }
            }
            Err(err) => {
                let (_, action) = handle_event(FlowPhase::Begin, FlowEvent::Failed(err.kind));
                (self.consume_or_keep(action, jar, ctx), Err(err))
            }
        };

        let result = result.map_err(|e| e.context(id, FlowStep::Authorize));
        observe(id, FlowStep::Authorize, &result);
        (jar, result)
    }

    /// Finish a flow from its callback.
    ///
    /// The state is consumed on every terminal outcome, success or failure,
    /// so a second callback with the same cookie finds nothing. Only a
    /// pending poll leaves it in place.
    #[instrument(skip_all, fields(driver = %ctx.driver, request_id = %ctx.request_id))]
    pub async fn complete(
        &self,
        ctx: &FlowContext,
        params: &CallbackParams,
        jar: CookieJar,
    ) -> Completion {
        let id = ctx.driver;
        let phase = FlowPhase::Redirected;

        let state = match self.carrier.load(&jar, id) {
            Ok(state) => state,
            Err(e) => {
                let err = FlowError::from(e).context(id, FlowStep::Callback);
                let (_, action) = handle_event(phase, FlowEvent::Failed(err.kind));
                let jar = self.consume_or_keep(action, jar, ctx);
                let result = Err(err);
                observe(id, FlowStep::Callback, &result);
                return Completion {
                    jar,
                    result,
                    state: None,
                };
            }
        };
        let (phase, _) = handle_event(phase, FlowEvent::StateLoaded);

        let result = match params.provider_error() {
            Some(err) => Err(err.context(id, FlowStep::Callback)),
            None => {
                let started = Instant::now();
                let exchanged = self.drivers.get(id).exchange_code(params, &state).await;
                metrics::record_provider_call(
                    id,
                    FlowStep::Exchange,
                    started.elapsed().as_secs_f64(),
                );
                exchanged.map_err(|e| {
                    let step = if e.is_terminal() {
                        FlowStep::Exchange
                    } else {
                        FlowStep::Poll
                    };
                    e.context(id, step)
                })
            }
        };

        let event = match &result {
            Ok(_) => FlowEvent::Exchanged,
            Err(e) if !e.is_terminal() => FlowEvent::Pending,
            Err(e) => FlowEvent::Failed(e.kind),
        };
        let (phase, action) = handle_event(phase, event);
        let jar = self.consume_or_keep(action, jar, ctx);
        info!(phase = ?phase, variant = %state.variant, "callback handled");
        observe(id, FlowStep::Callback, &result);

        Completion {
            jar,
            result,
            state: Some(state),
        }
    }

    /// Exchange a refresh token without going through a browser flow.
    #[instrument(skip_all, fields(driver = %ctx.driver, request_id = %ctx.request_id))]
    pub async fn refresh_only(
        &self,
        ctx: &FlowContext,
        refresh_token: &str,
        credentials: &AppCredentials,
    ) -> driver::Result<TokenResult> {
        let id = ctx.driver;
        let result = if refresh_token.trim().is_empty() {
            Err(FlowError::invalid_input("invalid refresh_token"))
        } else {
            let started = Instant::now();
            let refreshed = self
                .drivers
                .get(id)
                .refresh(refresh_token.trim(), credentials)
                .await;
            metrics::record_provider_call(id, FlowStep::Refresh, started.elapsed().as_secs_f64());
            refreshed
        };

        let result = result.map_err(|e| e.context(id, FlowStep::Refresh));
        observe(id, FlowStep::Refresh, &result);
        result
    }

    fn apply(
        &self,
        action: FlowAction,
        jar: CookieJar,
        ctx: &FlowContext,
        state: &FlowState,
    ) -> driver::Result<CookieJar> {
        match action {
            FlowAction::SaveState => self
                .carrier
                .save(jar, ctx.driver, &ctx.route, state)
                .map_err(FlowError::from),
            _ => Ok(self.consume_or_keep(action, jar, ctx)),
        }
    }

    fn consume_or_keep(&self, action: FlowAction, jar: CookieJar, ctx: &FlowContext) -> CookieJar {
        match action {
            FlowAction::ConsumeState => self.carrier.consume(jar, &ctx.route),
            _ => jar,
        }
    }
}

fn observe<T>(driver: DriverId, step: FlowStep, result: &driver::Result<T>) {
    match result {
        Ok(_) => metrics::record_flow(driver, step, "ok"),
        Err(e) if !e.is_terminal() => {
            metrics::record_flow(driver, step, "pending");
            info!(status = ?e.provider_status, "login not completed yet");
        }
        Err(e) => {
            metrics::record_flow(driver, step, "error");
            metrics::record_error(driver, e.kind);
            warn!(
                kind = %e.kind,
                step = %e.step.unwrap_or(step),
                message = %e.message,
                "flow step failed"
            );
        }
    }
}
