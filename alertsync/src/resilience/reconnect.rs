//! Reconnect policy for long-lived streaming connections
//!
//! The reconnect loop is itself a continuous probe, so it pairs the backoff
//! schedule with a latching breaker: after `max_consecutive_failures` failed
//! sessions the supervisor stops and stays stopped until [`ReconnectSupervisor::reset`].

use std::fmt::Display;
use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{CircuitBreaker, CircuitBreakerSettings, ResilienceError, RetryPolicy};
use crate::config::ReconnectConfig;

#[derive(Debug)]
pub struct ReconnectSupervisor {
    breaker: CircuitBreaker,
    backoff: RetryPolicy,
}

impl ReconnectSupervisor {
    pub fn new(name: impl Into<String>, max_consecutive_failures: u32, backoff: RetryPolicy) -> Self {
        Self {
            breaker: CircuitBreaker::new(
                name,
                CircuitBreakerSettings::latching(max_consecutive_failures),
            ),
            backoff,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &ReconnectConfig) -> Self {
        Self::new(name, config.max_consecutive_failures, RetryPolicy::from(config))
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Re-arm a supervisor that gave up
    pub fn reset(&self) {
        info!(connection = %self.breaker.name(), "Reconnect supervisor reset");
        self.breaker.reset();
    }

    /// Keep `session` running until cancelled or latched open
    ///
    /// `session` connects and runs until the connection ends. `Ok(())` is a
    /// session that was established and later closed; it clears the failure
    /// streak. `Err` counts towards the latch.
    ///
    /// Returns [`ResilienceError::cancelled`] on shutdown, the last session
    /// error once the latch trips, or [`ResilienceError::circuit_open`] if
    /// called while already latched.
    pub async fn run<E, F, Fut>(&self, cancel: &CancellationToken, mut session: F) -> Result<(), E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: ResilienceError + Display,
    {
        let name = self.breaker.name().to_string();
        loop {
            if cancel.is_cancelled() {
                return Err(E::cancelled());
            }
            if !self.breaker.try_acquire() {
                return Err(E::circuit_open(&name));
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                outcome = session() => outcome,
            };

            let delay = match outcome {
                Ok(()) => {
                    self.breaker.record_success();
                    info!(connection = %name, "Connection closed, reconnecting");
                    self.backoff.delay_for(0)
                }
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) => {
                    self.breaker.record_failure();
                    let failures = self.breaker.consecutive_failures();
                    if !self.breaker.try_acquire() {
                        error!(
                            connection = %name,
                            failures,
                            error = %e,
                            "Connection failed too many times in a row, giving up"
                        );
                        return Err(e);
                    }
                    let delay = self.backoff.delay_for(failures.saturating_sub(1));
                    warn!(
                        connection = %name,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection failed, backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
