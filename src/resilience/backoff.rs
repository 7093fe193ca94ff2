//! Exponential backoff with jitter.
//!
//! `delay(n) = min(max_delay, base_delay * multiplier^(n-1) + uniform(0, max_jitter))`
//! for retry `n >= 1`. Attempt 0 (the first try) has no delay.

use std::time::Duration;
use rand::Rng;

use crate::config::BackoffConfig;

/// Deterministic part of the delay for retry `attempt`, before jitter and cap.
pub fn base_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let delay_ms = config.base_delay_ms as f64 * config.backoff_multiplier.powi(exponent);
    millis_f64(delay_ms)
}

/// Full delay for retry `attempt`, jitter drawn from `rng`.
pub fn delay_with_rng<R: Rng + ?Sized>(config: &BackoffConfig, attempt: u32, rng: &mut R) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let jitter_ms = if config.max_jitter_ms > 0 {
        rng.gen_range(0..=config.max_jitter_ms)
    } else {
        0
    };

    let delay = base_delay(config, attempt).saturating_add(Duration::from_millis(jitter_ms));
    delay.min(Duration::from_millis(config.max_delay_ms))
}

/// Full delay for retry `attempt` using the thread-local RNG.
pub fn calculate_backoff(config: &BackoffConfig, attempt: u32) -> Duration {
    delay_with_rng(config, attempt, &mut rand::thread_rng())
}

fn millis_f64(ms: f64) -> Duration {
    if !ms.is_finite() || ms >= u64::MAX as f64 {
        return Duration::from_millis(u64::MAX);
    }
    Duration::from_millis(ms.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_backoff_calculation() {
        let config = BackoffConfig::default();

        assert_eq!(base_delay(&config, 0), Duration::ZERO);
        assert_eq!(base_delay(&config, 1), Duration::from_secs(2));
        assert_eq!(base_delay(&config, 2), Duration::from_secs(4));
        assert_eq!(base_delay(&config, 5), Duration::from_secs(32));
    }

    #[test]
    fn test_first_attempt_has_no_delay() {
        let config = BackoffConfig::default();
        assert_eq!(calculate_backoff(&config, 0), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        let config = BackoffConfig::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let delay = delay_with_rng(&config, 3, &mut rng);
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_millis(9_000));
        }
    }

    #[test]
    fn test_never_exceeds_max_delay() {
        let config = BackoffConfig::default();
        let max = Duration::from_millis(config.max_delay_ms);

        for attempt in 1..=64 {
            assert!(calculate_backoff(&config, attempt) <= max);
        }
        // 2s * 2^9 = 1024s is past the 600s cap.
        assert_eq!(calculate_backoff(&config, 10), max);
        assert_eq!(calculate_backoff(&config, u32::MAX), max);
    }

    #[test]
    fn test_non_decreasing_without_jitter() {
        let config = BackoffConfig {
            max_jitter_ms: 0,
            ..BackoffConfig::default()
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = calculate_backoff(&config, attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }
}
