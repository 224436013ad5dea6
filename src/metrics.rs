//! Prometheus metrics for the relay.
//!
//! Handlers call the `record_*` helpers; the exporter renders them at
//! `GET /metrics`.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global Prometheus recorder (first call only) and return its handle.
///
/// Returns `None` if another recorder already owns the global slot.
pub fn init() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                None
            }
        })
        .clone()
}

/// Count a finished relay request by kind (`playlist`, `segment`, `subtitle`) and status.
pub fn record_request(kind: &'static str, status: u16) {
    counter!("relay_requests_total", "kind" => kind, "status" => status.to_string()).increment(1);
}

pub fn record_duration(kind: &'static str, start: Instant) {
    histogram!("relay_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

/// A request rejected by the allow-list guard.
pub fn record_denied() {
    counter!("relay_denied_total").increment(1);
}

pub fn record_origin_error() {
    counter!("relay_upstream_errors_total").increment(1);
}

/// Token bootstrap attempt; `outcome` is `ok` or `error`.
pub fn record_token_bootstrap(outcome: &'static str) {
    counter!("relay_token_bootstraps_total", "outcome" => outcome).increment(1);
}

/// A client went away before a segment body finished streaming.
pub fn record_segment_abort() {
    counter!("relay_segment_aborts_total").increment(1);
}
