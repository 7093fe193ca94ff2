//! Connection orchestration.
//!
//! # Responsibilities
//! - Own the connector (and with it the pool) for the process lifetime
//! - Route every database call through retrier → circuit breaker → timeout
//! - Run the periodic health check and react to network changes
//! - Aggregate `ConnectionMetrics` and re-publish state events
//!
//! # Data Flow
//! ```text
//! caller → execute_query / acquire_connection
//!        → BackoffRetrier (cancellable backoff)
//!        → CircuitBreaker (fail fast when open)
//!        → Connector::connect + statement
//!
//! HealthMonitor tick ─┐
//! NetworkMonitor event┴→ check_health / forced Disconnected → StateTracker
//! ```
//!
//! # Design Decisions
//! - Health checks pass through the breaker once per tick, never retried
//! - Network loss forces `Disconnected` without waiting for a tick
//! - `stop` is terminal; later calls fail with `Error::Stopped`, and calls
//!   already in flight (including backoff sleeps) end with it at once
//! - The policy is validated on construction; a zero interval is rejected

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::validation::validate_policy;
use crate::config::ResiliencePolicy;
use crate::context::Context;
use crate::db::{Connection, Connector, FromSqlValue, Row, SqlValue, SqlxConnector};
use crate::error::{Error, Result};
use crate::health::{ConnectionState, ConnectionStateChange, HealthMonitor, HealthTarget, StateTracker};
use crate::network::{NetworkMonitor, NetworkState, NetworkStateChange};
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{BackoffRetrier, CircuitBreaker, CircuitState, CircuitStateChange};

mod stats;

pub use stats::ConnectionMetrics;
use stats::{LiveState, MetricsRecorder};

struct Tasks {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Health check scheduled after the network comes back.
struct PendingRecheck {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner<C: Connector> {
    policy: ResiliencePolicy,
    connector: C,
    breaker: CircuitBreaker,
    retrier: BackoffRetrier,
    network: Arc<NetworkMonitor>,
    state: StateTracker,
    stats: MetricsRecorder,
    tasks: Mutex<Option<Tasks>>,
    /// Cancelled by `stop`; aborts calls still in flight.
    lifetime: CancellationToken,
}

/// Self-healing access to one database.
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl ConnectionManager<SqlxConnector> {
    /// Manager over a lazily-connected sqlx pool and the system network monitor.
    pub fn from_policy(policy: ResiliencePolicy) -> Result<Self> {
        let connector = SqlxConnector::new(&policy.database)?;
        let network = Arc::new(NetworkMonitor::new(policy.network.clone()));
        Self::new(policy, connector, network)
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Fails with `Error::Config` listing every problem when the policy does
    /// not pass `validate_policy`.
    pub fn new(policy: ResiliencePolicy, connector: C, network: Arc<NetworkMonitor>) -> Result<Self> {
        if let Err(errors) = validate_policy(&policy) {
            let problems: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(Error::Config(problems.join("; ")));
        }

        let breaker = CircuitBreaker::new(policy.circuit_breaker.clone());
        let retrier = BackoffRetrier::new(policy.backoff.clone())
            .with_retry_hook(|_, _, _| metrics::record_retry());

        Ok(Self {
            inner: Arc::new(Inner {
                policy,
                connector,
                breaker,
                retrier,
                network,
                state: StateTracker::new(),
                stats: MetricsRecorder::default(),
                tasks: Mutex::new(None),
                lifetime: CancellationToken::new(),
            }),
        })
    }

    /// Start the health loop and network watch, then probe once.
    pub async fn start(&self, ctx: &Context) -> Result<()> {
        self.inner.ensure_running()?;

        {
            let mut tasks = self.inner.lock_tasks();
            if tasks.is_some() {
                return Ok(());
            }

            self.inner.state.transition(ConnectionState::Connecting, "connection manager starting");

            let shutdown = CancellationToken::new();
            let network_rx = self.inner.network.subscribe();
            self.inner.network.start();

            let target: Arc<dyn HealthTarget> = self.inner.clone();
            let health = HealthMonitor::new(target, self.inner.policy.health_check.clone());

            let handles = vec![
                tokio::spawn(health.run(shutdown.clone())),
                tokio::spawn(self.inner.clone().watch_network(network_rx, shutdown.clone())),
            ];
            *tasks = Some(Tasks { shutdown, handles });
        }

        tracing::info!(
            interval_secs = self.inner.policy.health_check.interval_secs,
            failure_threshold = self.inner.policy.circuit_breaker.failure_threshold,
            max_retries = self.inner.policy.backoff.max_retries,
            "Connection manager started"
        );

        self.inner.check_health(ctx).await;
        Ok(())
    }

    /// Cancel background work, close the pool, and refuse further calls.
    ///
    /// Cleanup always runs. `ctx` only bounds the wait for the background
    /// tasks to exit; if it ends first, its error is returned after the pool
    /// has been closed.
    pub async fn stop(&self, ctx: &Context) -> Result<()> {
        let first = self.inner.state.stop("connection manager stopped");
        self.inner.lifetime.cancel();
        let tasks = self.inner.lock_tasks().take();

        let mut joined = Ok(());
        if let Some(tasks) = tasks {
            tasks.shutdown.cancel();
            joined = ctx
                .run(async {
                    for handle in tasks.handles {
                        if let Err(e) = handle.await {
                            tracing::error!(error = %e, "Background task failed");
                        }
                    }
                    Ok(())
                })
                .await;
            if let Err(err) = &joined {
                tracing::warn!(error = %err, "Gave up waiting for background tasks");
            }
        }

        self.inner.network.stop().await;

        if first {
            self.inner.connector.close().await;
            tracing::info!("Connection manager stopped");
        }
        joined
    }

    /// Open a connection through the retry and breaker path.
    pub async fn acquire_connection(&self, ctx: &Context) -> Result<C::Connection> {
        let inner = &*self.inner;
        self.call(ctx, move || async move { inner.connect().await }).await
    }

    pub async fn execute_query(&self, ctx: &Context, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let inner = &*self.inner;
        self.call(ctx, move || async move {
            let mut conn = inner.connect().await?;
            conn.query(sql, params).await
        })
        .await
    }

    /// First column of the first row converted to `T`. An empty result
    /// converts from `SqlValue::Null`, so use `Option<T>` when it may be empty.
    pub async fn execute_scalar<T: FromSqlValue>(&self, ctx: &Context, sql: &str, params: &[SqlValue]) -> Result<T> {
        let inner = &*self.inner;
        let value = self
            .call(ctx, move || async move {
                let mut conn = inner.connect().await?;
                conn.query_scalar(sql, params).await
            })
            .await?;
        T::from_sql_value(value.unwrap_or(SqlValue::Null))
    }

    /// Run a statement and return the affected row count.
    pub async fn execute_non_query(&self, ctx: &Context, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let inner = &*self.inner;
        self.call(ctx, move || async move {
            let mut conn = inner.connect().await?;
            conn.execute(sql, params).await
        })
        .await
    }

    /// Probe the database now, outside the schedule.
    pub async fn force_health_check(&self, ctx: &Context) -> bool {
        if self.inner.state.is_stopped() {
            return false;
        }
        tracing::info!("Manual health check requested");
        let (ctx, _scope) = self.inner.call_context(ctx);
        self.inner.check_health(&ctx).await
    }

    pub fn reset_circuit_breaker(&self) {
        self.inner.breaker.reset();
    }

    pub fn metrics(&self) -> ConnectionMetrics {
        self.inner.stats.snapshot(&self.inner.live_state())
    }

    pub fn reset_metrics(&self) {
        self.inner.stats.reset(&self.inner.live_state());
        tracing::info!("Connection metrics reset");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.is_stopped()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    pub fn network_state(&self) -> NetworkState {
        self.inner.network.current_state()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<ConnectionStateChange> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_circuit(&self) -> broadcast::Receiver<CircuitStateChange> {
        self.inner.breaker.subscribe()
    }

    pub fn subscribe_network(&self) -> broadcast::Receiver<NetworkStateChange> {
        self.inner.network.subscribe()
    }

    pub fn network_monitor(&self) -> &Arc<NetworkMonitor> {
        &self.inner.network
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.inner.policy
    }

    async fn call<T, F, Fut>(&self, ctx: &Context, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.inner.ensure_running()?;

        let inner = &*self.inner;
        let (call_ctx, _scope) = inner.call_context(ctx);
        let call_ctx = &call_ctx;
        let op = &op;
        let result = inner
            .retrier
            .execute(call_ctx, move |_attempt| async move {
                inner.ensure_running()?;
                inner.guarded(call_ctx, op).await
            })
            .await;

        match result {
            Err(err) if err.is_cancellation() && inner.lifetime.is_cancelled() && ctx.check().is_ok() => {
                Err(Error::Stopped)
            }
            other => other,
        }
    }
}

impl<C: Connector> Inner<C> {
    fn ensure_running(&self) -> Result<()> {
        if self.state.is_stopped() {
            Err(Error::Stopped)
        } else {
            Ok(())
        }
    }

    /// Child of `ctx` that is also cancelled when the manager stops. The
    /// guard ends the link when the call returns.
    fn call_context(&self, ctx: &Context) -> (Context, DropGuard) {
        let call_ctx = ctx.child();
        let token = call_ctx.token().clone();
        let lifetime = self.lifetime.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = lifetime.cancelled() => token.cancel(),
                _ = token.cancelled() => {}
            }
        });

        let scope = call_ctx.token().clone().drop_guard();
        (call_ctx, scope)
    }

    async fn connect(&self) -> Result<C::Connection> {
        with_timeout(self.policy.database.connect_timeout(), self.connector.connect()).await
    }

    /// One breaker-guarded attempt, cancellable through `ctx`.
    async fn guarded<T, F, Fut>(&self, ctx: &Context, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = self.breaker.execute(|| ctx.run(op())).await;
        self.stats.record_outcome(&result, started.elapsed());

        match &result {
            Err(err @ Error::Unexpected(_)) => {
                tracing::error!(error = %err, kind = err.kind(), "Unexpected database error");
            }
            Err(err) if !err.is_cancellation() && !matches!(err, Error::CircuitOpen { .. }) => {
                tracing::warn!(error = %err, kind = err.kind(), "Database call failed");
            }
            _ => {}
        }
        result
    }

    fn live_state(&self) -> LiveState {
        LiveState {
            current_state: self.state.current(),
            circuit_state: self.breaker.state(),
            network_state: self.network.current_state(),
            circuit_trips: self.breaker.snapshot().trip_count,
            state_transitions: self.state.transition_count(),
        }
    }

    fn apply_health_result(&self, result: &Result<()>) {
        match result {
            Ok(()) if self.breaker.state() == CircuitState::Closed => {
                self.state.transition(ConnectionState::Connected, "health check succeeded");
            }
            Ok(()) => {
                self.state.transition(
                    ConnectionState::Reconnecting,
                    "health check succeeded, circuit still recovering",
                );
            }
            Err(err) if err.is_cancellation() => {
                tracing::debug!(error = %err, "Health check cancelled");
            }
            Err(err @ Error::CircuitOpen { .. }) => {
                self.state.transition(ConnectionState::Disconnected, err.to_string());
            }
            Err(err) if self.breaker.state() == CircuitState::Open => {
                self.state.transition(
                    ConnectionState::Disconnected,
                    format!("circuit breaker opened: {}", err),
                );
            }
            Err(err @ Error::Config(_)) => {
                self.state.transition(ConnectionState::Error, err.to_string());
            }
            Err(err) => {
                self.state.transition_if(
                    |current| current != ConnectionState::Disconnected,
                    ConnectionState::Reconnecting,
                    format!("health check failed: {}", err),
                );
            }
        }
    }

    async fn watch_network(self: Arc<Self>, mut rx: broadcast::Receiver<NetworkStateChange>, shutdown: CancellationToken) {
        let mut recheck: Option<PendingRecheck> = None;

        loop {
            tokio::select! {
                change = rx.recv() => match change {
                    Ok(change) => self.on_network_change(change, &shutdown, &mut recheck),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "Network events lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }

        if let Some(pending) = recheck {
            pending.token.cancel();
            let _ = pending.handle.await;
        }
    }

    fn on_network_change(
        self: &Arc<Self>,
        change: NetworkStateChange,
        shutdown: &CancellationToken,
        recheck: &mut Option<PendingRecheck>,
    ) {
        if let Some(pending) = recheck.take() {
            pending.token.cancel();
        }

        match change.current {
            NetworkState::Unavailable => {
                self.state.transition_if(
                    |current| {
                        matches!(
                            current,
                            ConnectionState::Connected | ConnectionState::Reconnecting | ConnectionState::Connecting
                        )
                    },
                    ConnectionState::Disconnected,
                    "network unavailable",
                );
            }
            NetworkState::Available if self.state.current() == ConnectionState::Disconnected => {
                let token = shutdown.child_token();
                let ctx = Context::from_token(token.clone());
                let handle = tokio::spawn(self.clone().recheck_after_delay(ctx));
                *recheck = Some(PendingRecheck { token, handle });
            }
            _ => {}
        }
    }

    /// Wait out the change delay, then probe if the network is still up.
    async fn recheck_after_delay(self: Arc<Self>, ctx: Context) {
        let delay = self.policy.network.network_change_delay();
        tracing::info!(delay = ?delay, "Network restored, scheduling health check");

        if ctx.sleep(delay).await.is_err() {
            return;
        }
        if self.network.is_available() {
            self.check_health(&ctx).await;
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Option<Tasks>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl<C: Connector> HealthTarget for Inner<C> {
    async fn check_health(&self, ctx: &Context) -> bool {
        if self.state.is_stopped() {
            return false;
        }

        let timeout = self.policy.health_check.timeout();
        let result = self
            .guarded(ctx, move || {
                with_timeout(timeout, async move {
                    let mut conn = self.connector.connect().await?;
                    conn.ping().await
                })
            })
            .await;

        if !matches!(&result, Err(err) if err.is_cancellation()) {
            self.stats.record_health_check(result.is_ok());
        }
        self.apply_health_result(&result);
        result.is_ok()
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("circuit", &self.circuit_state())
            .field("network", &self.network_state())
            .finish()
    }
}
