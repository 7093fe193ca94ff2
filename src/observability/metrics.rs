//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define resilience metrics (attempts, latency, breaker and network state)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `dbguard_connection_attempts_total` (counter): attempts by outcome
//! - `dbguard_connection_duration_seconds` (histogram): attempt latency
//! - `dbguard_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `dbguard_circuit_trips_total` (counter): transitions into open
//! - `dbguard_connection_state` (gauge): connection state code
//! - `dbguard_network_state` (gauge): 0=unknown, 1=available, 2=limited, 3=unavailable
//! - `dbguard_retries_total` (counter): backoff retries scheduled
//! - `dbguard_health_checks_total` (counter): health checks by outcome

use std::net::SocketAddr;
use std::time::Duration;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::ConnectionState;
use crate::network::NetworkState;
use crate::resilience::CircuitState;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_attempt(outcome: &'static str, duration: Duration) {
    metrics::counter!("dbguard_connection_attempts_total", "outcome" => outcome).increment(1);
    metrics::histogram!("dbguard_connection_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_circuit_state(state: CircuitState) {
    metrics::gauge!("dbguard_circuit_state").set(state.as_gauge());
}

pub fn record_circuit_trip() {
    metrics::counter!("dbguard_circuit_trips_total").increment(1);
}

pub fn record_connection_state(state: ConnectionState) {
    metrics::gauge!("dbguard_connection_state").set(state.as_gauge());
}

pub fn record_network_state(state: NetworkState) {
    metrics::gauge!("dbguard_network_state").set(state.as_gauge());
}

pub fn record_retry() {
    metrics::counter!("dbguard_retries_total").increment(1);
}

pub fn record_health_check(healthy: bool) {
    let outcome = if healthy { "healthy" } else { "unhealthy" };
    metrics::counter!("dbguard_health_checks_total", "outcome" => outcome).increment(1);
}
