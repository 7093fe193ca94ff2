//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResiliencePolicy (validated, immutable)
//!     → handed to each component at construction
//! ```
//!
//! # Design Decisions
//! - Policy is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ResiliencePolicy;
pub use schema::DatabaseConfig;
pub use schema::CircuitBreakerConfig;
pub use schema::BackoffConfig;
pub use schema::HealthCheckConfig;
pub use schema::NetworkConfig;
pub use schema::ObservabilityConfig;
pub use schema::AdminConfig;
