//! Metrics collection and exposition.
//!
//! # Metrics
//! - `envelope_created_total` (counter)
//! - `envelope_claims_total` (counter): claims by outcome
//! - `envelope_store_conflicts_total` (counter): optimistic-update conflicts
//! - `payout_requests_total` (counter): payouts by outcome
//! - `payout_batch_size` (histogram): deliveries per drained batch
//! - `chain_rpc_duration_seconds` (histogram): RPC latency by method

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_envelope_created() {
    metrics::counter!("envelope_created_total").increment(1);
}

pub fn record_claim(outcome: &'static str) {
    metrics::counter!("envelope_claims_total", "outcome" => outcome).increment(1);
}

pub fn record_store_conflict() {
    metrics::counter!("envelope_store_conflicts_total").increment(1);
}

pub fn record_payout(outcome: &'static str) {
    metrics::counter!("payout_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_batch(size: usize) {
    metrics::histogram!("payout_batch_size").record(size as f64);
}

pub fn record_rpc_call(method: &str, started: Instant) {
    metrics::histogram!("chain_rpc_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}
