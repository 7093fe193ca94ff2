//! Retry logic.
//!
//! # Responsibilities
//! - Run an attempt function, retrying retryable errors with exponential backoff + jitter
//! - Stop immediately on cancellation, circuit rejection and non-retryable errors
//!   (see `Error::is_retryable`: only `Connection` and `Timeout` are retried)
//! - Check the caller's context before every attempt and bound every backoff sleep by it
//!
//! # Design Decisions
//! - Stateless across calls: each delay is a pure function of attempt index and policy
//! - No delay before the first attempt
//! - After `max_retries` retries the last error is returned unchanged
//! - Attempts observe the context themselves; a cancelled attempt surfaces as
//!   `Error::Cancelled` and stops the loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackoffConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::resilience::backoff::calculate_backoff;

type RetryHook = Arc<dyn Fn(u32, Duration, &Error) + Send + Sync>;

/// Wraps an operation with bounded exponential-backoff retries.
#[derive(Clone)]
pub struct BackoffRetrier {
    config: BackoffConfig,
    on_retry: Option<RetryHook>,
}

impl BackoffRetrier {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, on_retry: None }
    }

    /// Call `hook(attempt, delay, error)` before each backoff sleep.
    pub fn with_retry_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, Duration, &Error) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay that precedes attempt `attempt` (0 for the first).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        calculate_backoff(&self.config, attempt)
    }

    /// Run `attempt_fn(attempt_index)` until it succeeds, fails terminally,
    /// or the retry budget is spent.
    pub async fn execute<F, Fut, T>(&self, ctx: &Context, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            ctx.check()?;
            let err = match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(attempt = attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                if !err.is_cancellation() {
                    tracing::debug!(attempt = attempt, error = %err, "Error is not retryable");
                }
                return Err(err);
            }

            if attempt >= self.config.max_retries {
                tracing::error!(
                    attempts = attempt + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }

            attempt += 1;
            let delay = self.delay_for_attempt(attempt);
            tracing::info!(attempt = attempt, delay = ?delay, error = %err, "Retrying operation");
            if let Some(hook) = &self.on_retry {
                hook(attempt, delay, &err);
            }

            ctx.sleep(delay).await?;
        }
    }
}

impl std::fmt::Debug for BackoffRetrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffRetrier")
            .field("config", &self.config)
            .field("has_retry_hook", &self.on_retry.is_some())
            .finish()
    }
}
