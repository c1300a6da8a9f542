//! Retry with exponential backoff and jitter.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::auth::error::LedgerError;

/// Errors that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        LedgerError::is_retryable(self)
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial backoff duration.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Execute an async operation with retry.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Retrying after error"
                    );

                    // Jitter: 75%–125% of backoff
                    let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
                    tokio::time::sleep(backoff.mul_f64(jitter_factor)).await;

                    backoff = Duration::from_secs_f64(
                        (backoff.as_secs_f64() * self.multiplier)
                            .min(self.max_backoff.as_secs_f64()),
                    );
                }
            }
        }
    }
}
