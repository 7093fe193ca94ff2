//! Connection state machine.
//!
//! # States
//! - Unknown: manager constructed, not started
//! - Connecting: started, first probe pending
//! - Connected: last probe succeeded with the circuit closed
//! - Reconnecting: probes failing or circuit still half-open
//! - Disconnected: circuit open, network down, or stopped
//! - Error: probe failed with a non-transient error
//!
//! # Design Decisions
//! - Only real changes are published
//! - After `stop` no further transitions are accepted
//! - State changes logged for observability

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unknown,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn as_gauge(&self) -> f64 {
        match self {
            ConnectionState::Unknown => 0.0,
            ConnectionState::Connecting => 1.0,
            ConnectionState::Connected => 2.0,
            ConnectionState::Reconnecting => 3.0,
            ConnectionState::Disconnected => 4.0,
            ConnectionState::Error => 5.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Unknown => "unknown",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Published on every connection state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStateChange {
    pub previous: ConnectionState,
    pub current: ConnectionState,
    pub message: String,
}

struct Inner {
    state: ConnectionState,
    stopped: bool,
}

/// Owns the current `ConnectionState` and its change stream.
pub struct StateTracker {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ConnectionStateChange>,
    transitions: AtomicU64,
}

impl StateTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner {
                state: ConnectionState::Unknown,
                stopped: false,
            }),
            events,
            transitions: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStateChange> {
        self.events.subscribe()
    }

    /// Number of transitions since construction or the last `reset_count`.
    pub fn transition_count(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }

    pub fn reset_count(&self) {
        self.transitions.store(0, Ordering::Relaxed);
    }

    /// Move to `to`. Returns false if already there or stopped.
    pub fn transition(&self, to: ConnectionState, message: impl Into<String>) -> bool {
        let change = {
            let mut inner = self.lock();
            if inner.stopped || inner.state == to {
                return false;
            }
            Self::apply(&mut inner, to, message.into())
        };
        self.publish(change);
        true
    }

    /// Move to `to` only when the current state satisfies `from`.
    pub fn transition_if<P>(&self, from: P, to: ConnectionState, message: impl Into<String>) -> bool
    where
        P: FnOnce(ConnectionState) -> bool,
    {
        let change = {
            let mut inner = self.lock();
            if inner.stopped || inner.state == to || !from(inner.state) {
                return false;
            }
            Self::apply(&mut inner, to, message.into())
        };
        self.publish(change);
        true
    }

    /// Enter the terminal stopped state.
    pub fn stop(&self, message: impl Into<String>) -> bool {
        let change = {
            let mut inner = self.lock();
            if inner.stopped {
                return false;
            }
            inner.stopped = true;
            (inner.state != ConnectionState::Disconnected)
                .then(|| Self::apply(&mut inner, ConnectionState::Disconnected, message.into()))
        };
        if let Some(change) = change {
            self.publish(change);
        }
        true
    }

    fn apply(inner: &mut Inner, to: ConnectionState, message: String) -> ConnectionStateChange {
        let previous = inner.state;
        inner.state = to;

        match to {
            ConnectionState::Disconnected | ConnectionState::Error => {
                tracing::warn!(previous = %previous, current = %to, reason = %message, "Connection state changed");
            }
            _ => {
                tracing::info!(previous = %previous, current = %to, reason = %message, "Connection state changed");
            }
        }

        ConnectionStateChange {
            previous,
            current: to,
            message,
        }
    }

    fn publish(&self, change: ConnectionStateChange) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
        metrics::record_connection_state(change.current);
        let _ = self.events.send(change);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StateTracker")
            .field("state", &inner.state)
            .field("stopped", &inner.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_publish_changes() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe();

        assert!(tracker.transition(ConnectionState::Connecting, "starting"));
        assert!(!tracker.transition(ConnectionState::Connecting, "again"));
        assert!(tracker.transition(ConnectionState::Connected, "probe ok"));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.previous, ConnectionState::Unknown);
        assert_eq!(first.current, ConnectionState::Connecting);
        assert_eq!(first.message, "starting");
        assert_eq!(rx.try_recv().unwrap().current, ConnectionState::Connected);
        assert!(rx.try_recv().is_err());
        assert_eq!(tracker.transition_count(), 2);
    }

    #[test]
    fn test_conditional_transition() {
        let tracker = StateTracker::new();
        tracker.transition(ConnectionState::Disconnected, "down");

        let moved = tracker.transition_if(
            |s| s == ConnectionState::Connected,
            ConnectionState::Reconnecting,
            "probe failed",
        );
        assert!(!moved);
        assert_eq!(tracker.current(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stop_is_terminal() {
        let tracker = StateTracker::new();
        tracker.transition(ConnectionState::Connected, "up");

        assert!(tracker.stop("stopped"));
        assert_eq!(tracker.current(), ConnectionState::Disconnected);
        assert!(tracker.is_stopped());

        assert!(!tracker.transition(ConnectionState::Connected, "late probe"));
        assert!(!tracker.stop("twice"));
        assert_eq!(tracker.current(), ConnectionState::Disconnected);
    }
}
