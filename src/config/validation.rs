//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, timeouts > 0, ports valid)
//! - Check cross-field consistency (base delay <= max delay)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResiliencePolicy → Result<(), Vec<ValidationError>>
//! - Runs before the policy is handed to any component

use crate::config::schema::ResiliencePolicy;

/// A single semantic problem in the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a policy for values that would make the components misbehave.
pub fn validate_policy(policy: &ResiliencePolicy) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let db = &policy.database;
    if db.url.trim().is_empty() {
        errors.push(ValidationError::new("database.url", "must not be empty"));
    }
    if db.max_connections == 0 {
        errors.push(ValidationError::new("database.max_connections", "must be at least 1"));
    }
    if db.connect_timeout_secs == 0 {
        errors.push(ValidationError::new("database.connect_timeout_secs", "must be greater than 0"));
    }

    let cb = &policy.circuit_breaker;
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be at least 1"));
    }
    if cb.success_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.success_threshold", "must be at least 1"));
    }
    if cb.half_open_max_attempts == 0 {
        errors.push(ValidationError::new("circuit_breaker.half_open_max_attempts", "must be at least 1"));
    }

    let backoff = &policy.backoff;
    if !(backoff.backoff_multiplier >= 1.0 && backoff.backoff_multiplier.is_finite()) {
        errors.push(ValidationError::new(
            "backoff.backoff_multiplier",
            format!("must be a finite value >= 1.0 (got {})", backoff.backoff_multiplier),
        ));
    }
    if backoff.base_delay_ms > backoff.max_delay_ms {
        errors.push(ValidationError::new(
            "backoff.base_delay_ms",
            format!(
                "must not exceed backoff.max_delay_ms ({} > {})",
                backoff.base_delay_ms, backoff.max_delay_ms
            ),
        ));
    }

    let health = &policy.health_check;
    if health.interval_secs == 0 {
        errors.push(ValidationError::new("health_check.interval_secs", "must be greater than 0"));
    }
    if health.timeout_secs == 0 {
        errors.push(ValidationError::new("health_check.timeout_secs", "must be greater than 0"));
    }

    let net = &policy.network;
    if net.connectivity_check_host.trim().is_empty() {
        errors.push(ValidationError::new("network.connectivity_check_host", "must not be empty"));
    }
    if net.connectivity_check_port == 0 {
        errors.push(ValidationError::new("network.connectivity_check_port", "must not be 0"));
    }
    if net.connectivity_check_timeout_ms == 0 {
        errors.push(ValidationError::new("network.connectivity_check_timeout_ms", "must be greater than 0"));
    }
    if net.probe_interval_secs == 0 {
        errors.push(ValidationError::new("network.probe_interval_secs", "must be greater than 0"));
    }
    if net.link_poll_interval_ms == 0 {
        errors.push(ValidationError::new("network.link_poll_interval_ms", "must be greater than 0"));
    }

    if policy.admin.enabled && policy.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
