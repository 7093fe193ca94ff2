//! Connection metrics aggregation.
//!
//! Counters are lock-free atomics updated on every attempt; the timestamps and
//! last error share one small mutex. `ConnectionMetrics` is computed on demand.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Error;
use crate::health::ConnectionState;
use crate::network::NetworkState;
use crate::observability::metrics;
use crate::resilience::CircuitState;

/// Point-in-time view of connection health and counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionMetrics {
    pub total_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub cancelled_operations: u64,
    pub rejected_by_circuit: u64,
    pub circuit_trips: u64,
    pub health_checks: u64,
    pub failed_health_checks: u64,
    pub state_transitions: u64,
    /// Fraction of attempts that succeeded, 0.0 when there were none.
    pub success_rate: f64,
    pub failure_rate: f64,
    pub average_connection_time_ms: f64,
    pub current_state: ConnectionState,
    pub circuit_state: CircuitState,
    pub network_state: NetworkState,
    /// UNIX epoch milliseconds.
    pub last_success: Option<u64>,
    pub last_failure: Option<u64>,
    pub last_error: Option<String>,
}

/// Live state the recorder cannot see, supplied by the manager.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LiveState {
    pub current_state: ConnectionState,
    pub circuit_state: CircuitState,
    pub network_state: NetworkState,
    pub circuit_trips: u64,
    pub state_transitions: u64,
}

#[derive(Default)]
struct LastSeen {
    success: Option<u64>,
    failure: Option<u64>,
    error: Option<String>,
}

#[derive(Default)]
pub(crate) struct MetricsRecorder {
    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    health_checks: AtomicU64,
    failed_health_checks: AtomicU64,
    connect_time_us: AtomicU64,
    trips_at_reset: AtomicU64,
    transitions_at_reset: AtomicU64,
    last: Mutex<LastSeen>,
}

impl MetricsRecorder {
    /// Account for one guarded call and its duration.
    pub fn record_outcome<T>(&self, result: &Result<T, Error>, elapsed: Duration) {
        match result {
            Ok(_) => {
                self.attempts.fetch_add(1, Ordering::Relaxed);
                self.successes.fetch_add(1, Ordering::Relaxed);
                let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
                self.connect_time_us.fetch_add(micros, Ordering::Relaxed);
                self.lock().success = Some(now_millis());
                metrics::record_connection_attempt("success", elapsed);
            }
            Err(err) if err.is_cancellation() => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                metrics::record_connection_attempt("cancelled", elapsed);
            }
            Err(Error::CircuitOpen { .. }) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_connection_attempt("rejected", elapsed);
            }
            Err(err) => {
                self.attempts.fetch_add(1, Ordering::Relaxed);
                self.failures.fetch_add(1, Ordering::Relaxed);
                let mut last = self.lock();
                last.failure = Some(now_millis());
                last.error = Some(err.to_string());
                drop(last);
                metrics::record_connection_attempt("failure", elapsed);
            }
        }
    }

    pub fn record_health_check(&self, healthy: bool) {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
        if !healthy {
            self.failed_health_checks.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_health_check(healthy);
    }

    /// Zero every counter. Breaker trips and state transitions are counted
    /// elsewhere, so their current totals become the new baseline.
    pub fn reset(&self, live: &LiveState) {
        for counter in [
            &self.attempts,
            &self.successes,
            &self.failures,
            &self.cancelled,
            &self.rejected,
            &self.health_checks,
            &self.failed_health_checks,
            &self.connect_time_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.trips_at_reset.store(live.circuit_trips, Ordering::Relaxed);
        self.transitions_at_reset.store(live.state_transitions, Ordering::Relaxed);
        *self.lock() = LastSeen::default();
    }

    pub fn snapshot(&self, live: &LiveState) -> ConnectionMetrics {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let connect_time_us = self.connect_time_us.load(Ordering::Relaxed);
        let last = self.lock();

        let ratio = |n: u64| if attempts == 0 { 0.0 } else { n as f64 / attempts as f64 };
        let average_connection_time_ms = if successes == 0 {
            0.0
        } else {
            connect_time_us as f64 / successes as f64 / 1000.0
        };

        ConnectionMetrics {
            total_attempts: attempts,
            successful_connections: successes,
            failed_connections: failures,
            cancelled_operations: self.cancelled.load(Ordering::Relaxed),
            rejected_by_circuit: self.rejected.load(Ordering::Relaxed),
            circuit_trips: live
                .circuit_trips
                .saturating_sub(self.trips_at_reset.load(Ordering::Relaxed)),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            failed_health_checks: self.failed_health_checks.load(Ordering::Relaxed),
            state_transitions: live
                .state_transitions
                .saturating_sub(self.transitions_at_reset.load(Ordering::Relaxed)),
            success_rate: ratio(successes),
            failure_rate: ratio(failures),
            average_connection_time_ms,
            current_state: live.current_state,
            circuit_state: live.circuit_state,
            network_state: live.network_state,
            last_success: last.success,
            last_failure: last.failure,
            last_error: last.error.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LastSeen> {
        self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
