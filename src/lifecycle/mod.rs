//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load policy → Validate → Init logging/metrics → Start manager → Serve admin API
//!
//! Shutdown:
//!     SIGTERM/SIGINT → cancel token → admin server drains → manager.stop()
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop serving, then stop the manager, then close the pool
//! - Shutdown has a deadline: the manager stop is bounded

pub mod signals;

pub use signals::shutdown_signal;
