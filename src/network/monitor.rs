//! Network connectivity monitor.
//!
//! # Responsibilities
//! - Track OS link state and debounce bursts of link changes
//! - Periodically probe real internet reachability
//! - Publish each distinct state change exactly once
//!
//! # Design Decisions
//! - Evaluations are serialized, so a slow probe can never publish over the
//!   result of a check that started after it

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::NetworkConfig;
use crate::context::Context;
use crate::network::{LinkStatus, NetworkState, NetworkStateChange, ReachabilityProbe, SystemLinkStatus, TcpProbe};
use crate::observability::metrics;

struct MonitorTasks {
    shutdown: CancellationToken,
    link_tx: mpsc::UnboundedSender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Watches link state and internet reachability.
pub struct NetworkMonitor {
    config: NetworkConfig,
    link: Arc<dyn LinkStatus>,
    probe: Arc<dyn ReachabilityProbe>,
    state: watch::Sender<NetworkState>,
    events: broadcast::Sender<NetworkStateChange>,
    evaluation: AsyncMutex<()>,
    tasks: Mutex<Option<MonitorTasks>>,
}

impl NetworkMonitor {
    /// Monitor backed by sysfs link state and a TCP probe.
    pub fn new(config: NetworkConfig) -> Self {
        let probe = TcpProbe::from_config(&config);
        Self::with_sources(config, Arc::new(SystemLinkStatus::new()), Arc::new(probe))
    }

    /// Monitor with explicit link and probe sources.
    pub fn with_sources(
        config: NetworkConfig,
        link: Arc<dyn LinkStatus>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        let (state, _) = watch::channel(NetworkState::Unknown);
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            link,
            probe,
            state,
            events,
            evaluation: AsyncMutex::new(()),
            tasks: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Last published state.
    pub fn current_state(&self) -> NetworkState {
        *self.state.borrow()
    }

    pub fn is_available(&self) -> bool {
        self.current_state().is_available()
    }

    /// Receive every future state change.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStateChange> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.lock_tasks().is_some()
    }

    /// Spawn the link watcher, debouncer and periodic probe. No-op if running.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.lock_tasks();
        if tasks.is_some() {
            return;
        }

        let shutdown = CancellationToken::new();
        let (link_tx, link_rx) = mpsc::unbounded_channel();

        let handles = vec![
            tokio::spawn(self.clone().run_link_watcher(link_tx.clone(), shutdown.clone())),
            tokio::spawn(self.clone().run_debouncer(link_rx, shutdown.clone())),
            tokio::spawn(self.clone().run_probe_loop(shutdown.clone())),
        ];

        tracing::info!(
            probe_target = %self.config.connectivity_check_target(),
            probe_interval_secs = self.config.probe_interval_secs,
            change_delay_ms = self.config.network_change_delay_ms,
            "Network monitor starting"
        );

        *tasks = Some(MonitorTasks { shutdown, link_tx, handles });
    }

    /// Cancel background tasks and wait for them to exit.
    pub async fn stop(&self) {
        let tasks = self.lock_tasks().take();
        if let Some(tasks) = tasks {
            tasks.shutdown.cancel();
            drop(tasks.link_tx);
            for handle in tasks.handles {
                let _ = handle.await;
            }
            tracing::info!("Network monitor stopped");
        }
    }

    /// Report an OS link change. Re-evaluation happens after the change delay,
    /// so a burst of notifications yields a single evaluation.
    pub fn notify_link_change(&self, link_up: bool) {
        if let Some(tasks) = self.lock_tasks().as_ref() {
            let _ = tasks.link_tx.send(link_up);
        }
    }

    /// Evaluate now, publish if changed, and report availability.
    pub async fn force_check(&self) -> bool {
        self.refresh().await.is_available()
    }

    /// Wait until the network is available, the timeout passes, or `ctx` ends.
    pub async fn wait_for_available(&self, ctx: &Context, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let wait = async {
            rx.wait_for(|state| state.is_available())
                .await
                .map(|_| ())
                .map_err(|_| crate::error::Error::Stopped)
        };

        matches!(ctx.with_timeout(timeout).run(wait).await, Ok(()))
    }

    /// Evaluate and publish while holding the evaluation lock.
    async fn refresh(&self) -> NetworkState {
        let _turn = self.evaluation.lock().await;
        let state = self.evaluate().await;
        self.publish(state);
        state
    }

    async fn evaluate(&self) -> NetworkState {
        if !self.link.is_link_up().await {
            return NetworkState::Unavailable;
        }
        if self.probe.probe().await {
            NetworkState::Available
        } else {
            NetworkState::Limited
        }
    }

    /// Publish `next` only when it differs from the last published state.
    fn publish(&self, next: NetworkState) {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = Some(*current);
            *current = next;
            true
        });

        if let Some(previous) = previous {
            if next.is_available() {
                tracing::info!(previous = %previous, current = %next, "Network state changed");
            } else {
                tracing::warn!(previous = %previous, current = %next, "Network state changed");
            }
            metrics::record_network_state(next);
            let _ = self.events.send(NetworkStateChange {
                previous,
                current: next,
                is_available: next.is_available(),
            });
        }
    }

    async fn run_link_watcher(self: Arc<Self>, link_tx: mpsc::UnboundedSender<bool>, shutdown: CancellationToken) {
        let mut ticker = time::interval(self.config.link_poll_interval());
        let mut last: Option<bool> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let up = self.link.is_link_up().await;
                    if last.is_some_and(|prev| prev != up) {
                        tracing::debug!(link_up = up, "Link state flipped");
                        let _ = link_tx.send(up);
                    }
                    last = Some(up);
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }

    async fn run_debouncer(self: Arc<Self>, mut link_rx: mpsc::UnboundedReceiver<bool>, shutdown: CancellationToken) {
        let delay = self.config.network_change_delay();
        let mut pending: Option<Instant> = None;

        loop {
            let deadline = pending;
            let settle = async move {
                match deadline {
                    Some(deadline) => time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                notification = link_rx.recv() => match notification {
                    Some(link_up) => {
                        tracing::debug!(link_up = link_up, "Link change notification");
                        pending = Some(Instant::now() + delay);
                    }
                    None => break,
                },
                _ = settle => {
                    pending = None;
                    self.refresh().await;
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }

    async fn run_probe_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = time::interval(self.config.probe_interval());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Option<MonitorTasks>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("target", &self.config.connectivity_check_target())
            .field("state", &self.current_state())
            .finish()
    }
}
