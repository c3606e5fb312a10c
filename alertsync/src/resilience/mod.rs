//! Resilience primitives shared by every outbound adapter
//!
//! - [`RetryPolicy`]: cancellable exponential backoff around one operation
//! - [`CircuitBreaker`]: Closed / Open / Half-Open state machine, either
//!   self-healing ([`BreakerMode::Probing`]) or latching until reset
//!   ([`BreakerMode::Latching`])
//! - [`ReconnectSupervisor`]: drives a long-lived connection with a latching
//!   breaker and the same backoff schedule
//!
//! Errors opt in through [`Retryable`] and [`ResilienceError`]; the
//! executors never look at transport details.

mod circuit_breaker;
mod reconnect;
mod retry;

pub use circuit_breaker::{BreakerMode, CircuitBreaker, CircuitBreakerSettings, CircuitState};
pub use reconnect::ReconnectSupervisor;
pub use retry::RetryPolicy;

/// Classification consulted by the retry executor
pub trait Retryable {
    /// Network failures, 5xx and 429 are retryable; 4xx, auth failures
    /// and cancellation are not
    fn is_retryable(&self) -> bool;

    /// Minimum wait the remote side asked for, e.g. HTTP `Retry-After`
    fn retry_after(&self) -> Option<std::time::Duration> {
        None
    }
}

/// Errors the executors can synthesize and recognize
pub trait ResilienceError: Retryable + Sized {
    /// The caller's cancellation signal fired
    fn cancelled() -> Self;

    /// A breaker rejected the call without running it
    fn circuit_open(name: &str) -> Self;

    /// Cancellation never counts as a breaker failure
    fn is_cancellation(&self) -> bool;
}
