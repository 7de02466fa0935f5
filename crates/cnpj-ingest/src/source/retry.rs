//! Retry policy with capped exponential backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// How often and how patiently a fallible operation is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries exactly once
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Run `operation` until it succeeds or the attempts are exhausted
    ///
    /// The closure receives the 1-based attempt number. The last error is
    /// returned unchanged when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => {
                    warn!(target_op = %what, attempt, error = %e, "Giving up after final attempt");
                    return Err(e);
                },
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        target_op = %what,
                        "Attempt {}/{} failed: {}",
                        attempt, attempts, e
                    );
                    info!("Retrying {} in {:.1}s...", what, delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_default_delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=5).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![4, 8, 10, 10, 10]);
    }

    #[test]
    fn test_custom_multiplier() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            multiplier: 3.0,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(300));
        assert_eq!(policy.delay_after(3), Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_succeeds_after_transient_failures() {
        let calls = Cell::new(0u32);
        let result: Result<&str, String> = RetryPolicy::default()
            .run("flaky", |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(format!("reset on attempt {}", attempt))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_last_error_when_exhausted() {
        let calls = Cell::new(0u32);
        let result: Result<(), String> = RetryPolicy::default()
            .run("always-down", |attempt| {
                calls.set(calls.get() + 1);
                async move { Err(format!("attempt {}", attempt)) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "attempt 5");
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test]
    async fn test_none_policy_tries_once() {
        let calls = Cell::new(0u32);
        let result: Result<(), &str> = RetryPolicy::none()
            .run("once", |_| {
                calls.set(calls.get() + 1);
                async { Err("nope") }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
