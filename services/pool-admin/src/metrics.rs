//! Prometheus metrics exposition
//!
//! The library crates emit through the `metrics` facade; this module installs
//! the recorder that collects them for `/metrics`:
//!
//! - `pool_cache_lookups_total` (counter): labels `category`, `result`
//! - `pool_cache_invalidations_total` (counter): label `kind`
//! - `pool_rate_limit_waits_total` (counter): label `partition`
//! - `pool_rate_limit_wait_seconds` (histogram): label `partition`
//! - `pool_remote_calls_total` (counter): labels `operation`, `outcome`
//! - `pool_credentials_unhealthy` (gauge)

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries for rate-limit waits: from a short spacing wait up to a
/// full window drain plus backoff.
const WAIT_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("pool_rate_limit_wait_seconds".to_string()),
            WAIT_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `pool_rate_limit_wait_seconds` gets explicit buckets so it renders as a
/// Prometheus histogram (with `_bucket` lines) rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
