//! Database connection resilience layer.
//!
//! A circuit breaker, an exponential-backoff retrier and a network monitor,
//! composed by `ConnectionManager` into a self-healing connection with
//! metrics and state events.

pub mod admin;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod manager;
pub mod network;
pub mod observability;
pub mod resilience;

pub use config::ResiliencePolicy;
pub use context::Context;
pub use error::{Error, Result};
pub use manager::{ConnectionManager, ConnectionMetrics};
