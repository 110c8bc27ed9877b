//! Per-flow state machine
//!
//! Pure state machine: receives events, returns (new_phase, action).
//! The engine performs the carrier I/O implied by each action.
//!
//! ```text
//! Begin -> Redirected -> Exchanging -> Completed
//!                 ^            |
//!                 +-- pending -+-> Failed
//! ```

use driver::{DriverId, ErrorKind};

/// Per-request context passed explicitly through engine and presentation.
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub driver: DriverId,
    /// Browser navigation (redirect responses) vs API call (JSON responses)
    pub interactive: bool,
    pub request_id: String,
    /// Route segment the request came in on; may be a driver alias
    pub route: String,
}

impl FlowContext {
    pub fn new(driver: DriverId, interactive: bool) -> Self {
        Self {
            driver,
            interactive,
            request_id: format!("flow_{}", uuid::Uuid::new_v4().as_simple()),
            route: driver.as_str().to_string(),
        }
    }

    pub fn at_route(mut self, route: &str) -> Self {
        self.route = route.to_string();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPhase {
    /// Request validated, nothing sent to the provider yet
    Begin,
    /// Browser sent to the provider; state lives in the carrier
    Redirected,
    /// Callback arrived and the state was loaded
    Exchanging,
    Completed,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    /// Driver produced an authorize URL
    AuthorizeBuilt,
    /// Carrier returned the state for this callback
    StateLoaded,
    /// Driver returned tokens
    Exchanged,
    /// Polling driver reported the login is not finished
    Pending,
    /// Any terminal error, including a missing state
    Failed(ErrorKind),
}

/// Carrier work the engine performs after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    SaveState,
    /// Clear the state cookie (every terminal callback outcome)
    ConsumeState,
    /// Leave the state cookie untouched for the next poll
    KeepState,
    None,
}

/// Handle a flow transition. Pure function: no I/O.
pub fn handle_event(phase: FlowPhase, event: FlowEvent) -> (FlowPhase, FlowAction) {
    match (phase, event) {
        (FlowPhase::Begin, FlowEvent::AuthorizeBuilt) => {
            (FlowPhase::Redirected, FlowAction::SaveState)
        }
        // Nothing was written yet, nothing to clear
        (FlowPhase::Begin, FlowEvent::Failed(kind)) => (FlowPhase::Failed(kind), FlowAction::None),

        (FlowPhase::Redirected, FlowEvent::StateLoaded) => {
            (FlowPhase::Exchanging, FlowAction::None)
        }
        (FlowPhase::Redirected, FlowEvent::Failed(kind)) => {
            (FlowPhase::Failed(kind), FlowAction::ConsumeState)
        }

        (FlowPhase::Exchanging, FlowEvent::Exchanged) => {
            (FlowPhase::Completed, FlowAction::ConsumeState)
        }
        (FlowPhase::Exchanging, FlowEvent::Pending) => (FlowPhase::Redirected, FlowAction::KeepState),
        (FlowPhase::Exchanging, FlowEvent::Failed(kind)) => {
            (FlowPhase::Failed(kind), FlowAction::ConsumeState)
        }

        // --- Invalid/unhandled transition: stay in current phase ---
        (phase, _event) => (phase, FlowAction::None),
    }
}
