//! Retry executor with capped exponential backoff

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ResilienceError;
use crate::config::{ReconnectConfig, RetryConfig};

/// Backoff schedule plus retry budget
///
/// The delay before retry `n` (zero based) is
/// `min(initial_delay * multiplier^n, max_delay)`, stretched to the
/// error's [`retry_after`](super::Retryable::retry_after) when the remote side asked for longer.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            max_retries,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(Duration::ZERO, 1.0, Duration::ZERO, 0)
    }

    /// Delay before retry number `retry` (zero based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out
    ///
    /// `op` receives the zero-based attempt number. Both the attempt and the
    /// backoff sleep race `cancel`; a fired token returns
    /// [`ResilienceError::cancelled`] without starting another attempt.
    pub async fn execute<T, E, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ResilienceError + Display,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(E::cancelled());
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                result = op(attempt) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if error.is_cancellation() || !error.is_retryable() {
                return Err(error);
            }

            if attempt >= self.max_retries {
                warn!(
                    attempt = attempt + 1,
                    error = %error,
                    "Retry budget exhausted"
                );
                return Err(error);
            }

            let backoff = self.delay_for(attempt);
            let delay = error.retry_after().map_or(backoff, |asked| asked.max(backoff));
            debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.initial_delay(),
            config.multiplier,
            config.max_delay(),
            config.max_retries,
        )
    }
}

impl From<&ReconnectConfig> for RetryPolicy {
    /// Backoff only; the reconnect budget lives in the latching breaker
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            config.multiplier,
            Duration::from_millis(config.max_delay_ms),
            0,
        )
    }
}
