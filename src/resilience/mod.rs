//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call into the database:
//!     → retries.rs (retry retryable errors with backoff.rs delays)
//!     → circuit_breaker.rs (fail fast when open, track outcomes)
//!     → timeouts.rs (bound the single attempt)
//!     → connector
//! ```
//!
//! # Design Decisions
//! - Every attempt has a deadline; the caller's context bounds the whole call
//! - Circuit rejections end the retry loop instead of sleeping through it
//! - Cancellation passes through every layer unchanged

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState, CircuitStateChange};
pub use retries::BackoffRetrier;
