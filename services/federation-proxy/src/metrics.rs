//! Prometheus metrics exposition
//!
//! - `federation_requests_total` (counter): label `status`
//! - `federation_request_duration_seconds` (histogram): label `status`
//! - `token_refreshes_total` (counter): label `outcome`
//! - `credential_invalidations_total` (counter)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Configures `federation_request_duration_seconds` with explicit buckets so
/// it renders as a Prometheus histogram (with `_bucket` lines usable by
/// `histogram_quantile()`) rather than the default summary. Boundaries cover
/// 5ms to 60s, the configurable upstream timeout range.
///
/// The handle's `render()` method produces the Prometheus text exposition
/// format served on `/metrics`.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "federation_request_duration_seconds".to_string(),
            ),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed federation request with its response status.
pub fn record_request(status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("federation_requests_total", "status" => status_str.clone()).increment(1);
    metrics::histogram!("federation_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record one token refresh exchange. Called once per actual exchange, not
/// once per waiting caller.
pub fn record_token_refresh(outcome: &str) {
    metrics::counter!("token_refreshes_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a credential invalidation triggered by an in-band rejection.
pub fn record_invalidation() {
    metrics::counter!("credential_invalidations_total").increment(1);
}
