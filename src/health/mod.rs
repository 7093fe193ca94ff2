//! Connection health subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe the database through the circuit breaker
//!     → Manager updates state.rs
//!
//! State machine (state.rs):
//!     Unknown → Connecting → Connected ⇄ Reconnecting → Disconnected
//!     Stop is terminal
//! ```
//!
//! # Design Decisions
//! - The loop only schedules probes; the manager decides transitions
//! - One probe per tick, never overlapping

pub mod active;
pub mod state;

pub use active::{HealthMonitor, HealthTarget};
pub use state::{ConnectionState, ConnectionStateChange, StateTracker};
