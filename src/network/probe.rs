//! Internet reachability probe.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

use crate::config::NetworkConfig;

/// Checks whether a well-known host is reachable.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Opens a short-lived TCP connection to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    target: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.connectivity_check_target(), config.connectivity_check_timeout())
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn probe(&self) -> bool {
        match time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                tracing::debug!(probe_target = %self.target, error = %e, "Reachability probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(probe_target = %self.target, timeout = ?self.timeout, "Reachability probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(probe.probe().await);
    }

    #[tokio::test]
    async fn test_probe_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(!probe.probe().await);
    }

    #[test]
    fn test_from_config() {
        let probe = TcpProbe::from_config(&NetworkConfig::default());
        assert_eq!(probe.target(), "8.8.8.8:53");
    }
}
