//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe the database
//! - Hand each probe to a `HealthTarget`, which applies the outcome

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HealthCheckConfig;
use crate::context::Context;

/// Something the health loop can probe.
#[async_trait]
pub trait HealthTarget: Send + Sync {
    /// Probe once and apply the result. Returns whether the probe succeeded.
    async fn check_health(&self, ctx: &Context) -> bool;
}

pub struct HealthMonitor {
    target: Arc<dyn HealthTarget>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(target: Arc<dyn HealthTarget>, config: HealthCheckConfig) -> Self {
        Self { target, config }
    }

    /// Probe every `interval` until `shutdown` fires. The first probe is one
    /// interval away; callers run the initial probe themselves.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.interval_secs,
            timeout_secs = self.config.timeout_secs,
            "Health monitor starting"
        );

        let interval = self.config.interval();
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ctx = Context::from_token(shutdown.child_token());
                    let healthy = self.target.check_health(&ctx).await;
                    tracing::debug!(healthy = healthy, "Scheduled health check finished");
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counter(AtomicU32);

    #[async_trait]
    impl HealthTarget for Counter {
        async fn check_health(&self, _ctx: &Context) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_on_interval_until_shutdown() {
        let target = Arc::new(Counter::default());
        let config = HealthCheckConfig {
            interval_secs: 120,
            timeout_secs: 30,
        };
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(HealthMonitor::new(target.clone(), config).run(shutdown.clone()));

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(240)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        handle.await.unwrap();

        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(target.0.load(Ordering::SeqCst), 3);
    }
}
