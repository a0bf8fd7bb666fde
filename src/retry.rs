//! Retry schedule for provider calls.
//!
//! A [`RetryPolicy`] turns into a sequence of waits: the backoff strategy
//! grows the base wait per retry, `max_delay` caps it, and jitter spreads
//! the result so that changes failing together in one wave do not come back
//! to the control plane in lockstep. Which errors deserve another attempt is
//! the caller's call; the executor passes `ProviderError::is_retryable`.
//!
//! ```rust,ignore
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(200))
//!     .backoff(BackoffStrategy::Exponential { multiplier: 2.0 })
//!     .jitter(JitterStrategy::Full)
//!     .build();
//!
//! let vpc = policy
//!     .execute(|| provider.create(types::VPC, &props), ProviderError::is_retryable)
//!     .await?;
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How the base wait grows from one retry to the next.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same wait every time.
    Constant,
    /// `initial * (retry + 1)`
    Linear,
    /// `initial * multiplier^retry`
    Exponential { multiplier: f64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential { multiplier: 2.0 }
    }
}

impl BackoffStrategy {
    /// Uncapped wait before retry number `retry` (0 for the first retry).
    pub fn base_wait(&self, initial: Duration, retry: u32) -> Duration {
        let factor = match *self {
            BackoffStrategy::Constant => 1.0,
            BackoffStrategy::Linear => f64::from(retry) + 1.0,
            BackoffStrategy::Exponential { multiplier } => multiplier.powi(retry as i32),
        };
        // mul_f64 panics on overflow or a negative factor
        let secs = initial.as_secs_f64() * factor;
        if secs.is_finite() && secs >= 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }
}

/// Randomisation applied to a capped wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    None,
    /// Anywhere in `[0, wait)`.
    #[default]
    Full,
    /// Half the wait plus anywhere in `[0, wait / 2)`.
    Equal,
}

impl JitterStrategy {
    pub fn spread<R: Rng + ?Sized>(&self, wait: Duration, rng: &mut R) -> Duration {
        if wait.is_zero() {
            return wait;
        }
        match self {
            JitterStrategy::None => wait,
            JitterStrategy::Full => wait.mul_f64(rng.gen::<f64>()),
            JitterStrategy::Equal => {
                let half = wait / 2;
                half + half.mul_f64(rng.gen::<f64>())
            }
        }
    }
}

/// How often and how patiently a provider call is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 means a single attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Upper bound applied before jitter.
    pub max_delay: Duration,
    pub backoff: BackoffStrategy,
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// Fixed wait, no jitter.
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff: BackoffStrategy::Constant,
            jitter: JitterStrategy::None,
        }
    }

    /// Capped wait before retry number `retry`, before jitter.
    pub fn capped_wait(&self, retry: u32) -> Duration {
        self.backoff
            .base_wait(self.initial_delay, retry)
            .min(self.max_delay)
    }

    /// Jittered wait before retry number `retry`.
    pub fn wait_before(&self, retry: u32) -> Duration {
        self.jitter
            .spread(self.capped_wait(retry), &mut rand::thread_rng())
    }

    /// Waits this policy would sleep between attempts, in order.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|retry| self.wait_before(retry))
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the retries run out.
    pub async fn execute<F, Fut, T, E, R>(
        &self,
        mut operation: F,
        is_retryable: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(attempts, "Provider call recovered");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !is_retryable(&error) {
                return Err(RetryError::NotRetryable { attempts, error });
            }
            if attempts > self.max_retries {
                return Err(RetryError::MaxRetriesExceeded {
                    attempts,
                    last_error: error,
                });
            }

            let wait = self.wait_before(attempts - 1);

            warn!(attempt = attempts, error = %error, ?wait, "Transient provider error, retrying");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Builder for [`RetryPolicy`], starting from its defaults.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.policy.backoff = backoff;
        self
    }

    pub fn jitter(mut self, jitter: JitterStrategy) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Why [`RetryPolicy::execute`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: E },

    #[error("{error}")]
    NotRetryable { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Attempts made, the failing one included.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::MaxRetriesExceeded { attempts, .. }
            | RetryError::NotRetryable { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::MaxRetriesExceeded { last_error, .. } => last_error,
            RetryError::NotRetryable { error, .. } => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    #[test]
    fn test_backoff_growth() {
        let initial = Duration::from_millis(100);

        assert_eq!(BackoffStrategy::Constant.base_wait(initial, 4), initial);
        assert_eq!(
            BackoffStrategy::Linear.base_wait(initial, 2),
            Duration::from_millis(300)
        );
        let doubling = BackoffStrategy::default();
        assert_eq!(doubling.base_wait(initial, 0), initial);
        assert_eq!(doubling.base_wait(initial, 3), Duration::from_millis(800));
        assert_eq!(doubling.base_wait(initial, 2000), Duration::MAX);
    }

    #[test]
    fn test_wait_is_capped_before_jitter() {
        let policy = RetryPolicy::builder()
            .max_retries(6)
            .initial_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .jitter(JitterStrategy::None)
            .build();

        let waits: Vec<_> = policy.schedule().map(|w| w.as_secs()).collect();
        assert_eq!(waits, vec![1, 2, 4, 5, 5, 5]);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let wait = Duration::from_secs(2);

        assert_eq!(JitterStrategy::None.spread(wait, &mut rng), wait);
        assert_eq!(JitterStrategy::Full.spread(Duration::ZERO, &mut rng), Duration::ZERO);
        for _ in 0..200 {
            assert!(JitterStrategy::Full.spread(wait, &mut rng) < wait);
            let equal = JitterStrategy::Equal.spread(wait, &mut rng);
            assert!(equal >= Duration::from_secs(1) && equal < wait);
        }
    }

    #[test]
    fn test_no_retries_means_empty_schedule() {
        let policy = RetryPolicy::constant(0, Duration::from_secs(1));
        assert_eq!(policy.schedule().count(), 0);
    }

    #[tokio::test]
    async fn test_recovers_from_transient_errors() {
        let calls = Cell::new(0);
        let result: Result<&str, RetryError<&str>> = RetryPolicy::constant(3, Duration::from_millis(1))
            .execute(
                || {
                    calls.set(calls.get() + 1);
                    let n = calls.get();
                    async move {
                        if n < 3 {
                            Err("throttled")
                        } else {
                            Ok("vpc-1")
                        }
                    }
                },
                |_| true,
            )
            .await;

        assert_eq!(result.unwrap(), "vpc-1");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let err = RetryPolicy::constant(2, Duration::from_millis(1))
            .execute(
                || {
                    calls.set(calls.get() + 1);
                    async { Err::<(), _>("internal") }
                },
                |_| true,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RetryError::MaxRetriesExceeded { attempts: 3, .. }));
        assert_eq!(err.to_string(), "gave up after 3 attempts: internal");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let err = RetryPolicy::constant(5, Duration::from_millis(1))
            .execute(
                || {
                    calls.set(calls.get() + 1);
                    async { Err::<(), _>("invalid cidr") }
                },
                |e: &&str| !e.starts_with("invalid"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 1);
        assert_eq!(err.to_string(), "invalid cidr");
        assert_eq!(err.into_inner(), "invalid cidr");
        assert_eq!(calls.get(), 1);
    }
}
