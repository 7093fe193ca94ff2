//! Network connectivity subsystem.
//!
//! # Data Flow
//! ```text
//! OS link changes (link.rs, polled or pushed via notify_link_change)
//!     → debounce for network_change_delay
//!     → re-evaluate
//!
//! Periodic reachability probe (probe.rs), independent of link events
//!     → re-evaluate
//!
//! Re-evaluate (monitor.rs):
//!     link down              → Unavailable
//!     link up, probe fails   → Limited
//!     link up, probe ok      → Available
//!     → publish only if different from the last published state
//! ```

pub mod link;
pub mod monitor;
pub mod probe;

use serde::Serialize;

pub use link::{LinkStatus, SystemLinkStatus};
pub use monitor::NetworkMonitor;
pub use probe::{ReachabilityProbe, TcpProbe};

/// Connectivity as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkState {
    Unknown,
    Available,
    /// Link is up but the internet probe fails.
    Limited,
    Unavailable,
}

impl NetworkState {
    pub fn is_available(&self) -> bool {
        matches!(self, NetworkState::Available)
    }

    /// Numeric encoding for gauges.
    pub fn as_gauge(&self) -> f64 {
        match self {
            NetworkState::Unknown => 0.0,
            NetworkState::Available => 1.0,
            NetworkState::Limited => 2.0,
            NetworkState::Unavailable => 3.0,
        }
    }
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::Unknown => write!(f, "unknown"),
            NetworkState::Available => write!(f, "available"),
            NetworkState::Limited => write!(f, "limited"),
            NetworkState::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Published when the computed network state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStateChange {
    pub previous: NetworkState,
    pub current: NetworkState,
    pub is_available: bool,
}
