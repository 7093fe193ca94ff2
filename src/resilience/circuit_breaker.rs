//! Circuit breaker guarding the database.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: database assumed down, calls fail fast
//! - Half-Open: a bounded number of trial calls decide recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold
//! Closed (success): failure_count decays toward 0
//! Open → Half-Open: open_to_half_open_delay elapsed (checked lazily on next call)
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One mutex guards all counters, so (state, failure_count) is never torn
//! - Cancellation is not a failure and gives back a half-open trial slot
//! - Transitions are published on a broadcast channel; sending never blocks

use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::{Error, Result};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for gauges (0 closed, 1 half-open, 2 open).
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Published on every state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitStateChange {
    pub previous: CircuitState,
    pub current: CircuitState,
    pub reason: String,
    pub failure_count: u32,
    pub last_error: Option<String>,
}

/// Point-in-time view of the breaker counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_attempts: u32,
    pub trip_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_attempts: u32,
    trip_count: u64,
    state_changed_at: Instant,
    last_error: Option<String>,
}

/// Three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<CircuitStateChange>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_attempts: 0,
                trip_count: 0,
                state_changed_at: Instant::now(),
                last_error: None,
            }),
            events,
        }
    }

    /// Receive every future state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitStateChange> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored state. Does not apply the lazy Open → Half-Open check.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_attempts: inner.half_open_attempts,
            trip_count: inner.trip_count,
            last_error: inner.last_error.clone(),
        }
    }

    /// Whether a call would currently be admitted.
    pub fn can_execute(&self) -> bool {
        let (allowed, change) = {
            let mut inner = self.lock();
            let change = self.refresh(&mut inner);
            let state = inner.state;
            let allowed = match state {
                CircuitState::Closed => true,
                CircuitState::Open => false,
                CircuitState::HalfOpen => inner.half_open_attempts < self.config.half_open_max_attempts,
            };
            (allowed, change)
        };
        self.publish(change);
        allowed
    }

    /// Run `op` if the circuit admits it, recording the outcome.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) if err.is_cancellation() => {
                self.release_trial();
                tracing::debug!(error = %err, "Guarded call cancelled; not counted as a failure");
                Err(err)
            }
            Err(err) => {
                self.record_failure(&err);
                Err(err)
            }
        }
    }

    /// Record a successful call made outside `execute`.
    pub fn record_success(&self) {
        let change = {
            let mut inner = self.lock();
            let state = inner.state;
            match state {
                CircuitState::Closed => {
                    inner.failure_count = inner.failure_count.saturating_sub(self.config.success_decay);
                    None
                }
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        let reason = format!("{} consecutive trial calls succeeded", inner.success_count);
                        let change = self.transition(&mut inner, CircuitState::Closed, reason);
                        inner.failure_count = 0;
                        inner.success_count = 0;
                        inner.half_open_attempts = 0;
                        inner.last_error = None;
                        Some(change)
                    } else {
                        None
                    }
                }
                // A trial that finished after another one already reopened the circuit.
                CircuitState::Open => None,
            }
        };
        self.publish(change);
    }

    /// Record a failed call made outside `execute`.
    pub fn record_failure(&self, err: &Error) {
        let change = {
            let mut inner = self.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_error = Some(err.to_string());

            let state = inner.state;
            match state {
                CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                    let reason = format!("failure threshold of {} reached", self.config.failure_threshold);
                    Some(self.open(&mut inner, reason))
                }
                CircuitState::HalfOpen => {
                    inner.success_count = 0;
                    Some(self.open(&mut inner, "trial call failed".to_string()))
                }
                _ => None,
            }
        };
        self.publish(change);
    }

    /// Force the circuit closed and clear its counters.
    pub fn reset(&self) {
        let change = {
            let mut inner = self.lock();
            let change = (inner.state != CircuitState::Closed)
                .then(|| self.transition(&mut inner, CircuitState::Closed, "manual reset".to_string()));
            inner.failure_count = 0;
            inner.success_count = 0;
            inner.half_open_attempts = 0;
            inner.last_error = None;
            change
        };
        tracing::info!("Circuit breaker reset");
        self.publish(change);
    }

    fn try_acquire(&self) -> Result<()> {
        let (admitted, change) = {
            let mut inner = self.lock();
            let change = self.refresh(&mut inner);
            let state = inner.state;
            let admitted = match state {
                CircuitState::Closed => Ok(()),
                CircuitState::HalfOpen if inner.half_open_attempts < self.config.half_open_max_attempts => {
                    inner.half_open_attempts += 1;
                    Ok(())
                }
                _ => Err(Error::CircuitOpen {
                    failure_count: inner.failure_count,
                    last_error: inner.last_error.clone(),
                }),
            };
            (admitted, change)
        };
        self.publish(change);
        admitted
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_attempts = inner.half_open_attempts.saturating_sub(1);
        }
    }

    /// Apply time-based transitions.
    fn refresh(&self, inner: &mut Inner) -> Option<CircuitStateChange> {
        let delay = self.config.open_to_half_open_delay();
        match inner.state {
            CircuitState::Open if inner.state_changed_at.elapsed() >= delay => {
                let change = self.transition(inner, CircuitState::HalfOpen, "cooldown elapsed".to_string());
                inner.success_count = 0;
                inner.half_open_attempts = 0;
                Some(change)
            }
            CircuitState::HalfOpen
                if inner.half_open_attempts >= self.config.half_open_max_attempts
                    && inner.state_changed_at.elapsed() >= delay =>
            {
                tracing::debug!("Half-open trial budget re-armed");
                inner.half_open_attempts = 0;
                inner.state_changed_at = Instant::now();
                None
            }
            _ => None,
        }
    }

    fn open(&self, inner: &mut Inner, reason: String) -> CircuitStateChange {
        inner.trip_count += 1;
        metrics::record_circuit_trip();
        self.transition(inner, CircuitState::Open, reason)
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, reason: String) -> CircuitStateChange {
        let previous = inner.state;
        inner.state = to;
        inner.state_changed_at = Instant::now();

        if to == CircuitState::Open {
            tracing::warn!(
                previous = %previous,
                current = %to,
                failure_count = inner.failure_count,
                reason = %reason,
                "Circuit breaker opened"
            );
        } else {
            tracing::info!(
                previous = %previous,
                current = %to,
                failure_count = inner.failure_count,
                reason = %reason,
                "Circuit breaker state changed"
            );
        }
        metrics::record_circuit_state(to);

        CircuitStateChange {
            previous,
            current: to,
            reason,
            failure_count: inner.failure_count,
            last_error: inner.last_error.clone(),
        }
    }

    fn publish(&self, change: Option<CircuitStateChange>) {
        if let Some(change) = change {
            // No subscribers is fine.
            let _ = self.events.send(change);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            open_to_half_open_delay_ms: 60_000,
            half_open_max_attempts: 3,
            success_threshold: 2,
            success_decay: 1,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Error {
        breaker
            .execute(|| async { Err::<(), _>(Error::Connection("refused".into())) })
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<()> {
        breaker.execute(|| async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(config());
        let mut events = breaker.subscribe();

        for _ in 0..4 {
            fail(&breaker).await;
            assert!(breaker.can_execute());
        }
        fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        let change = events.try_recv().unwrap();
        assert_eq!(change.previous, CircuitState::Closed);
        assert_eq!(change.current, CircuitState::Open);
        assert_eq!(change.failure_count, 5);
        assert_eq!(change.last_error.as_deref(), Some("connection failed: refused"));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_fails_fast_without_calling() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            fail(&breaker).await;
        }

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = breaker
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err {
            Error::CircuitOpen { failure_count, last_error } => {
                assert_eq!(failure_count, 5);
                assert!(last_error.unwrap().contains("refused"));
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_until_delay_elapsed() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            fail(&breaker).await;
        }

        tokio::time::advance(Duration::from_millis(59_999)).await;
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_transition_is_idempotent() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            fail(&breaker).await;
        }
        let mut events = breaker.subscribe();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(breaker.can_execute());
        assert!(breaker.can_execute());
        assert!(breaker.can_execute());

        let change = events.try_recv().unwrap();
        assert_eq!(change.current, CircuitState::HalfOpen);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_consecutive_successes() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);
        assert_eq!(snapshot.trip_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        succeed(&breaker).await.unwrap();
        fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
        assert_eq!(breaker.snapshot().trip_count, 2);

        // The success run starts over after the next cooldown.
        tokio::time::advance(Duration::from_secs(61)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_trial_calls() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            success_threshold: 5,
            ..config()
        });
        for _ in 0..5 {
            fail(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        for _ in 0..3 {
            succeed(&breaker).await.unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.can_execute());
        assert!(matches!(succeed(&breaker).await, Err(Error::CircuitOpen { .. })));

        // Re-armed by time.
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_success_decays_failure_count() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.snapshot().failure_count, 2);

        for _ in 0..5 {
            succeed(&breaker).await.unwrap();
        }
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test]
    async fn test_zero_decay_keeps_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            success_decay: 0,
            ..config()
        });
        fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn test_cancellation_not_counted() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..10 {
            let err = breaker
                .execute(|| async { Err::<(), _>(Error::Cancelled) })
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Cancelled));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_and_publishes() {
        let breaker = CircuitBreaker::new(config());
        for _ in 0..5 {
            fail(&breaker).await;
        }
        let mut events = breaker.subscribe();

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert_eq!(breaker.snapshot().failure_count, 0);

        let change = events.try_recv().unwrap();
        assert_eq!(change.previous, CircuitState::Open);
        assert_eq!(change.reason, "manual reset");

        // Resetting a closed circuit is silent.
        breaker.reset();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_failures_open_once() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new(config()));
        let mut events = breaker.subscribe();

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let breaker = breaker.clone();
            tasks.push(tokio::spawn(async move {
                let _ = breaker
                    .execute(|| async { Err::<(), _>(Error::Connection("down".into())) })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.trip_count, 1);
        assert!(snapshot.failure_count >= 5);
        assert_eq!(events.try_recv().unwrap().current, CircuitState::Open);
        assert!(events.try_recv().is_err());
    }
}
