//! Bounded retry with exponential backoff and jitter for remote calls.
//!
//! Each attempt runs under its own timeout; a timeout counts as a transient
//! `Error::Service`. Non-transient errors are returned immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Random jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_percent: f64,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter_percent: 0.1,
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings, attempt_timeout: Duration) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_factor: settings.backoff_factor.max(1.0),
            jitter_percent: settings.jitter_percent.clamp(0.0, 1.0),
            max_attempts: settings.max_attempts.max(1),
            attempt_timeout,
        }
    }

    /// Delay before retry number `attempt` (0-indexed), jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = attempt.min(31) as i32;
        let base_ms = (initial_ms * self.backoff_factor.powi(exp)).min(max_ms);
        let jitter = if self.jitter_percent > 0.0 && base_ms > 0.0 {
            let range = base_ms * self.jitter_percent;
            rand::thread_rng().gen_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_millis((base_ms + jitter).max(0.0) as u64)
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Service(format!(
                "{what} timed out after {}ms",
                policy.attempt_timeout.as_millis()
            ))),
        };
        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(what, attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_factor: 2.0,
            jitter_percent: 0.0,
            max_attempts: 3,
            attempt_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn delay_grows_and_caps() {
        let p = RetryPolicy { jitter_percent: 0.0, ..fast_policy() };
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(1));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(2));
        assert_eq!(p.delay_for_attempt(5), Duration::from_millis(4));
    }

    #[test]
    fn jitter_stays_in_range() {
        let p = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter_percent: 0.1,
            ..fast_policy()
        };
        for _ in 0..50 {
            let d = p.delay_for_attempt(0).as_millis();
            assert!((90..=110).contains(&d), "delay {d} outside jitter band");
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let out = with_retry(&fast_policy(), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Service("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let out: Result<()> = with_retry(&fast_policy(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Service("down".into()))
        })
        .await;
        assert!(matches!(out, Err(Error::Service(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let out: Result<()> = with_retry(&fast_policy(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Validation("bad".into()))
        })
        .await;
        assert!(matches!(out, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_as_service_errors() {
        let p = RetryPolicy { attempt_timeout: Duration::from_millis(5), max_attempts: 2, ..fast_policy() };
        let out: Result<()> = with_retry(&p, "slow", || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        })
        .await;
        assert!(matches!(out, Err(Error::Service(msg)) if msg.contains("timed out")));
    }
}
