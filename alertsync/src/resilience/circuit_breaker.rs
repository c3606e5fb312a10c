//! Circuit breaker for fault tolerance
//!
//! One state machine, two shapes:
//!
//! - [`BreakerMode::Probing`] for request/response calls. After `timeout`
//!   in Open, calls are let through as Half-Open probes; `success_threshold`
//!   consecutive successes close the circuit, any failure reopens it.
//! - [`BreakerMode::Latching`] for persistent connections. Once open it
//!   stays open until [`CircuitBreaker::reset`] is called.
//!
//! State sits behind a std mutex that is never held across an await.

use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::ResilienceError;
use crate::config::CircuitBreakerConfig;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow; failures are counted
    Closed,
    /// Calls are rejected
    Open,
    /// Probe calls are allowed
    HalfOpen,
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Recovery behaviour once the circuit has opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerMode {
    /// Self-healing through Half-Open probes
    Probing {
        /// Time since the last failure before a probe is allowed
        timeout: Duration,
        /// Consecutive probe successes required to close
        success_threshold: u32,
    },
    /// Stays open until reset
    Latching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit
    pub max_failures: u32,
    pub mode: BreakerMode,
}

impl CircuitBreakerSettings {
    pub fn probing(max_failures: u32, timeout: Duration, success_threshold: u32) -> Self {
        Self {
            max_failures,
            mode: BreakerMode::Probing {
                timeout,
                success_threshold: success_threshold.max(1),
            },
        }
    }

    pub fn latching(max_failures: u32) -> Self {
        Self {
            max_failures,
            mode: BreakerMode::Latching,
        }
    }
}

impl From<&CircuitBreakerConfig> for CircuitBreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self::probing(
            config.max_failures,
            config.timeout(),
            config.success_threshold,
        )
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

/// Shared, thread-safe circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Ask permission for one call
    ///
    /// An Open probing breaker whose timeout has elapsed moves to Half-Open
    /// here and admits the call.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match self.settings.mode {
                BreakerMode::Latching => false,
                BreakerMode::Probing { timeout, .. } => {
                    let elapsed = inner
                        .last_failure
                        .map(|at| at.elapsed() >= timeout)
                        .unwrap_or(true);
                    if elapsed {
                        debug!(breaker = %self.name, "Circuit breaker half-open, allowing probe");
                        inner.state = CircuitState::HalfOpen;
                        inner.half_open_successes = 0;
                    }
                    elapsed
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                let threshold = match self.settings.mode {
                    BreakerMode::Probing {
                        success_threshold, ..
                    } => success_threshold,
                    BreakerMode::Latching => 1,
                };
                if inner.half_open_successes >= threshold {
                    warn!(breaker = %self.name, "Circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.max_failures {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        latching = matches!(self.settings.mode, BreakerMode::Latching),
                        "Circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Circuit breaker probe failed, reopening");
                inner.state = CircuitState::Open;
                inner.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Close the circuit and clear all counters
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.last_failure = None;
        debug!(breaker = %self.name, "Circuit breaker reset");
    }

    /// Run `op` under breaker protection
    ///
    /// Rejected calls fail with [`ResilienceError::circuit_open`] without
    /// running `op`. Cancellation is passed through uncounted.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ResilienceError,
    {
        if !self.try_acquire() {
            return Err(E::circuit_open(&self.name));
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                if !error.is_cancellation() {
                    self.record_failure();
                }
                Err(error)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
