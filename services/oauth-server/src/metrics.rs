//! Prometheus metrics exposition
//!
//! - `oauth_redirects_total` (counter): label `outcome`
//! - `oauth_callbacks_total` (counter): label `outcome`
//! - `oauth_token_exchange_duration_seconds` (histogram): label `result`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const EXCHANGE_DURATION: &str = "oauth_token_exchange_duration_seconds";

/// Token endpoint latency buckets, 50ms to 30s.
const EXCHANGE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(EXCHANGE_DURATION.to_string()), EXCHANGE_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record the outcome of a start (`/`) request.
pub fn record_redirect(outcome: &'static str) {
    metrics::counter!("oauth_redirects_total", "outcome" => outcome).increment(1);
}

/// Record the outcome of a `/callback` request.
pub fn record_callback(outcome: &'static str) {
    metrics::counter!("oauth_callbacks_total", "outcome" => outcome).increment(1);
}

/// Record how long the token endpoint took to answer.
pub fn record_exchange_duration(success: bool, duration_secs: f64) {
    let result = if success { "success" } else { "failure" };
    metrics::histogram!(EXCHANGE_DURATION, "result" => result).record(duration_secs);
}
