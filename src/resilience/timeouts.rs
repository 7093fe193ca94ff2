//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap a single database call with a time budget
//! - Map an elapsed budget to `Error::Timeout`, distinct from cancellation
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - A timed-out attempt is retryable; an expired caller deadline is not

use std::future::Future;
use std::time::Duration;
use tokio::time;

use crate::error::{Error, Result};

/// Run `fut`, failing with `Error::Timeout` after `limit`.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_wrapper() {
        let fast = with_timeout(Duration::from_millis(10), async { Ok(42) }).await;
        assert_eq!(fast.unwrap(), 42);

        let slow = with_timeout(Duration::from_millis(10), async {
            time::sleep(Duration::from_millis(20)).await;
            Ok(42)
        })
        .await;
        assert!(matches!(slow, Err(Error::Timeout(d)) if d == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let err = with_timeout(Duration::from_secs(1), async {
            Err::<(), _>(Error::Query("syntax error".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }
}
