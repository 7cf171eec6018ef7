// src/core/retry.rs

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Shape of the delay between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every failed attempt, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

/// Attempt limit plus backoff, shared by engine launch and scan creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// The last error of an exhausted policy.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self { max_attempts, backoff }
    }

    /// Number of attempts actually made; a zero limit still allows one attempt.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given (1-based) attempt failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                initial.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }

    /// Runs `operation` until it succeeds or the attempt limit is reached.
    ///
    /// # Arguments
    /// * `label` - Human-readable name of the operation, used in log lines.
    /// * `operation` - Called with the 1-based attempt number.
    ///
    /// # Returns
    /// The first successful value, or the last error together with the attempt count.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = label, attempt, "Succeeded after retry.");
                    }
                    return Ok(value);
                }
                Err(error) if attempt >= attempts => {
                    warn!(operation = label, attempt, error = %error, "Giving up, attempts exhausted.");
                    return Err(RetryError { attempts: attempt, last: error });
                }
                Err(error) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = attempts,
                        retry_in = ?delay,
                        error = %error,
                        "Attempt failed, retrying."
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
