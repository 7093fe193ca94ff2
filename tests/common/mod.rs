//! Shared fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use dbguard::config::ResiliencePolicy;
use dbguard::db::{Connection, Connector, Row, SqlValue};
use dbguard::network::{LinkStatus, NetworkMonitor, ReachabilityProbe};
use dbguard::{ConnectionManager, Error, Result};

/// Scriptable database behaviour shared by a connector and its connections.
#[derive(Default)]
pub struct FakeDb {
    pub down: AtomicBool,
    pub hang: AtomicBool,
    pub fail_next: AtomicU32,
    pub connects: AtomicU32,
    pub closes: AtomicU32,
    /// Extra time every connect takes, in milliseconds.
    pub latency_ms: AtomicU64,
}

impl FakeDb {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        if self.down.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct FakeConnector {
    pub db: Arc<FakeDb>,
}

pub struct FakeConnection {
    db: Arc<FakeDb>,
}

#[async_trait]
impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self) -> Result<FakeConnection> {
        self.db.connects.fetch_add(1, Ordering::SeqCst);
        let latency = self.db.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.db.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.db.should_fail() {
            return Err(Error::Connection("connection refused".into()));
        }
        Ok(FakeConnection { db: self.db.clone() })
    }

    async fn close(&self) {
        self.db.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn ping(&mut self) -> Result<()> {
        if self.db.down.load(Ordering::SeqCst) {
            return Err(Error::Connection("server closed the connection".into()));
        }
        Ok(())
    }

    async fn query(&mut self, _sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let value = params.first().cloned().unwrap_or(SqlValue::Int(1));
        Ok(vec![Row::new(vec!["value".into()], vec![value])])
    }

    async fn execute(&mut self, _sql: &str, _params: &[SqlValue]) -> Result<u64> {
        Ok(1)
    }
}

#[derive(Default)]
pub struct FakeLink(pub AtomicBool);

#[async_trait]
impl LinkStatus for FakeLink {
    async fn is_link_up(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeProbe(pub AtomicBool);

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Policy with long timers so only the test drives probes.
pub fn test_policy() -> ResiliencePolicy {
    let mut policy = ResiliencePolicy::default();
    policy.health_check.interval_secs = 3_600;
    policy.network.probe_interval_secs = 3_600;
    policy.backoff.base_delay_ms = 100;
    policy.backoff.max_jitter_ms = 0;
    policy.backoff.max_retries = 3;
    policy
}

pub struct Harness {
    pub manager: ConnectionManager<FakeConnector>,
    pub db: Arc<FakeDb>,
    pub link: Arc<FakeLink>,
    pub probe: Arc<FakeProbe>,
}

impl Harness {
    pub fn new(policy: ResiliencePolicy) -> Self {
        Self::try_new(policy).expect("valid policy")
    }

    pub fn try_new(policy: ResiliencePolicy) -> Result<Self> {
        let db = Arc::new(FakeDb::default());
        let link = Arc::new(FakeLink(AtomicBool::new(true)));
        let probe = Arc::new(FakeProbe(AtomicBool::new(true)));
        let network = Arc::new(NetworkMonitor::with_sources(
            policy.network.clone(),
            link.clone(),
            probe.clone(),
        ));
        let manager = ConnectionManager::new(policy, FakeConnector { db: db.clone() }, network)?;
        Ok(Self { manager, db, link, probe })
    }

    pub fn set_link(&self, up: bool) {
        self.link.0.store(up, Ordering::SeqCst);
    }
}

/// Let spawned tasks observe pending events.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}
