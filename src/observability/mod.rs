//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breaker, network monitor, manager produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metric calls are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
