//! Prometheus metrics exposition
//!
//! - `relay_flows_total` (counter): labels `driver`, `step`, `outcome`
//! - `relay_provider_call_duration_seconds` (histogram): labels `driver`, `step`
//! - `relay_flow_errors_total` (counter): labels `driver`, `kind`

use driver::{DriverId, ErrorKind, FlowStep};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const PROVIDER_CALL_BUCKETS: &[f64] = &[0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("relay_provider_call_duration_seconds".to_string()),
            PROVIDER_CALL_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Buckets run from 25ms to 30s, covering the configurable provider timeout.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record one flow step outcome (`ok`, `pending` or `error`).
pub fn record_flow(driver: DriverId, step: FlowStep, outcome: &'static str) {
    metrics::counter!(
        "relay_flows_total",
        "driver" => driver.as_str(),
        "step" => step.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record how long a driver spent talking to its provider.
pub fn record_provider_call(driver: DriverId, step: FlowStep, duration_secs: f64) {
    metrics::histogram!(
        "relay_provider_call_duration_seconds",
        "driver" => driver.as_str(),
        "step" => step.as_str()
    )
    .record(duration_secs);
}

pub fn record_error(driver: DriverId, kind: ErrorKind) {
    metrics::counter!(
        "relay_flow_errors_total",
        "driver" => driver.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}
