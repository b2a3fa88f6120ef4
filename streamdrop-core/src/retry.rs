use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// How an operation failure should be treated by a [`RetryPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Wait exactly this long, then retry. Used for upstream rate limits.
    After(Duration),
    /// Retry after the policy's own backoff delay
    Backoff,
    /// Give up immediately
    Never,
}

/// Errors that know whether retrying them makes sense
pub trait Retryable {
    fn retry_hint(&self) -> RetryHint;
}

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retrying after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Bounded retry with backoff, shared by session creation and chunk fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// The operation did not succeed within the policy
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, max },
        }
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt bound is hit. `op` receives the 1-based attempt number.
    ///
    /// Rate-limit waits ([`RetryHint::After`]) count as an attempt but their
    /// duration is not capped.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryFailure<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let delay = match error.retry_hint() {
                RetryHint::Never => {
                    debug!(what, attempt, %error, "not retrying");
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
                _ if attempt >= self.max_attempts => {
                    warn!(what, attempt, %error, "giving up after max attempts");
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                    });
                }
                RetryHint::After(wait) => wait,
                RetryHint::Backoff => self.backoff.delay(attempt),
            };

            debug!(what, attempt, ?delay, %error, "retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
