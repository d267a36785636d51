//! Retry utilities with exponential backoff and jitter.
//!
//! The wrapper is independent of any task shape: it takes a zero-argument
//! async operation and a [`RetryPolicy`] and returns either the first success
//! or a [`RetryError`]. It performs no I/O besides calling the operation and
//! sleeping between attempts. Callers that want to observe retries pass a
//! notify hook to [`with_retry_notify`].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::errors::{FetchError, RetryError};

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    #[default]
    Equal,
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    /// Returns true if the operation should be attempted again.
    fn is_retryable(&self) -> bool;
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        Self::is_retryable(self)
    }
}

/// Configuration for retry behavior.
///
/// The delay after failed attempt `n` (1-based) is
/// `min(base_delay * multiplier^(n-1), max_delay)`, then jittered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first one.
    pub max_attempts: usize,
    /// Delay after the first failure in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor applied per additional failure.
    pub multiplier: f64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 30000,
            jitter: JitterStrategy::Equal,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Attempts actually allowed; a zero budget still runs once.
    #[must_use]
    pub fn effective_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Un-jittered delay after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.multiplier.max(0.0).powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay after failed attempt `attempt` with jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let delay = u64::try_from(self.backoff_delay(attempt).as_millis()).unwrap_or(u64::MAX);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    (delay - half) + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }

    /// Worst-case time spent sleeping across all attempts.
    #[must_use]
    pub fn max_total_delay(&self) -> Duration {
        (1..self.effective_attempts())
            .map(|attempt| self.backoff_delay(attempt))
            .sum()
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Decides what to do after failed attempt `attempt` (1-based).
#[must_use]
pub fn should_retry(policy: &RetryPolicy, attempt: usize, retryable: bool) -> RetryDecision {
    if !retryable {
        return RetryDecision::NotRetryable;
    }
    if attempt >= policy.effective_attempts() {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(policy.delay_for(attempt))
}

/// Executes an operation, retrying errors that report themselves retryable.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    with_retry_notify(policy, E::is_retryable, |_, _, _| {}, operation).await
}

/// Executes an operation, retrying errors accepted by `is_retryable`.
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    with_retry_notify(policy, is_retryable, |_, _, _| {}, operation).await
}

/// Executes an operation with retry logic, calling `notify` before each sleep.
///
/// `notify` receives the error, the failed attempt number (1-based) and the
/// delay about to be slept.
pub async fn with_retry_notify<T, E, F, Fut, P, N>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut notify: N,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    N: FnMut(&E, usize, Duration),
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => match should_retry(policy, attempt, is_retryable(&error)) {
                RetryDecision::Retry(delay) => {
                    notify(&error, attempt, delay);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                RetryDecision::NotRetryable => {
                    return Err(RetryError::Rejected { attempt, error });
                }
            },
        }
    }
}
