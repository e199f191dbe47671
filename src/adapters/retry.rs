use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every failed attempt
    Exponential(Duration),
}

/// Bounded retry of transient failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, initial: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential(initial),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential(initial) => {
                initial.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            }
        }
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out.
    ///
    /// Only errors that convert to a transient `AppError` are retried.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<AppError> + Clone,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let transient = Into::<AppError>::into(e.clone()).is_transient();
                    if !transient || attempt >= self.max_attempts {
                        return Err(e);
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        "⚠️ {} failed (attempt {}/{}), retrying in {:?}",
                        label, attempt, self.max_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
