//! Destination adapter errors
//!
//! HTTP statuses and transport failures are classified here, at the adapter
//! boundary, so nothing above needs to know about reqwest.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use thiserror::Error;

use crate::resilience::{ResilienceError, Retryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifierErrorKind {
    /// Connect, timeout or broken transport
    Network,
    /// HTTP 429 or a vendor rate-limit code
    RateLimited,
    /// HTTP 5xx
    Server,
    /// HTTP 401/403 or a vendor auth error
    Unauthorized,
    /// Any other 4xx or vendor rejection
    Client,
    /// Request or response body could not be (de)serialized
    Serialization,
    /// The destination lacks the requested capability
    Unsupported,
    /// Cancellation signal fired
    Cancelled,
    /// The destination's circuit breaker rejected the call
    CircuitOpen,
}

impl NotifierErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::Unauthorized => "unauthorized",
            Self::Client => "client",
            Self::Serialization => "serialization",
            Self::Unsupported => "unsupported",
            Self::Cancelled => "cancelled",
            Self::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for NotifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Notifier {kind} error{origin}: {message}", origin = origin(.destination, .status))]
pub struct NotifierError {
    /// Destination name, e.g. "slack"
    pub destination: String,
    pub kind: NotifierErrorKind,
    /// HTTP status when the failure came from a response
    pub status: Option<u16>,
    pub message: String,
    /// Wait the destination asked for before the next attempt
    pub retry_after: Option<Duration>,
}

impl NotifierError {
    pub fn new(
        destination: impl Into<String>,
        kind: NotifierErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            kind,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classify a non-success HTTP status
    pub fn http(destination: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => NotifierErrorKind::RateLimited,
            401 | 403 => NotifierErrorKind::Unauthorized,
            500..=599 => NotifierErrorKind::Server,
            _ => NotifierErrorKind::Client,
        };
        Self {
            destination: destination.into(),
            kind,
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classify a non-success status, keeping any `Retry-After` hint
    pub fn from_response(
        destination: impl Into<String>,
        status: u16,
        headers: &HeaderMap,
        message: impl Into<String>,
    ) -> Self {
        let mut error = Self::http(destination, status, message);
        error.retry_after = retry_after(headers);
        error
    }

    /// Classify a transport-level failure
    pub fn from_reqwest(destination: impl Into<String>, err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::http(destination, status.as_u16(), err.to_string());
        }
        let kind = if err.is_decode() || err.is_body() {
            NotifierErrorKind::Serialization
        } else if err.is_builder() {
            NotifierErrorKind::Client
        } else {
            NotifierErrorKind::Network
        };
        Self::new(destination, kind, err.to_string())
    }

    pub fn unsupported(destination: impl Into<String>, operation: &str) -> Self {
        let destination = destination.into();
        let message = format!("{} does not support {}", destination, operation);
        Self::new(destination, NotifierErrorKind::Unsupported, message)
    }

    /// Fill in the destination on errors synthesized without one
    #[must_use]
    pub fn with_destination(mut self, destination: &str) -> Self {
        if self.destination.is_empty() {
            self.destination = destination.to_string();
        }
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == NotifierErrorKind::Cancelled
    }
}

/// " from slack (HTTP 429)", or whichever parts are known
fn origin(destination: &str, status: &Option<u16>) -> String {
    let mut origin = String::new();
    if !destination.is_empty() {
        origin.push_str(" from ");
        origin.push_str(destination);
    }
    if let Some(status) = status {
        origin.push_str(&format!(" (HTTP {})", status));
    }
    origin
}

/// Delay-seconds form of `Retry-After`; HTTP dates are ignored
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl Retryable for NotifierError {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            NotifierErrorKind::Network | NotifierErrorKind::RateLimited | NotifierErrorKind::Server
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl ResilienceError for NotifierError {
    fn cancelled() -> Self {
        Self::new("", NotifierErrorKind::Cancelled, "operation cancelled")
    }

    fn circuit_open(name: &str) -> Self {
        Self::new(name, NotifierErrorKind::CircuitOpen, "circuit breaker is open")
    }

    fn is_cancellation(&self) -> bool {
        self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let cases = [
            (429, NotifierErrorKind::RateLimited, true),
            (500, NotifierErrorKind::Server, true),
            (503, NotifierErrorKind::Server, true),
            (401, NotifierErrorKind::Unauthorized, false),
            (403, NotifierErrorKind::Unauthorized, false),
            (400, NotifierErrorKind::Client, false),
            (404, NotifierErrorKind::Client, false),
        ];
        for (status, kind, retryable) in cases {
            let err = NotifierError::http("slack", status, "x");
            assert_eq!(err.kind, kind, "status {}", status);
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
        }
    }

    #[test]
    fn test_cancel_and_open_are_not_retryable() {
        assert!(!NotifierError::cancelled().is_retryable());
        assert!(!NotifierError::circuit_open("slack").is_retryable());
        assert!(NotifierError::cancelled().is_cancellation());
    }

    #[test]
    fn test_display() {
        let err = NotifierError::http("pagerduty", 503, "Service Unavailable");
        assert_eq!(
            err.to_string(),
            "Notifier server error from pagerduty (HTTP 503): Service Unavailable"
        );
        let err = NotifierError::cancelled().with_destination("slack");
        assert_eq!(err.destination, "slack");
        assert_eq!(
            NotifierError::cancelled().to_string(),
            "Notifier cancelled error: operation cancelled"
        );
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "30".parse().unwrap());
        let err = NotifierError::from_response("slack", 429, &headers, "");
        assert_eq!(err.kind, NotifierErrorKind::RateLimited);
        assert_eq!(Retryable::retry_after(&err), Some(Duration::from_secs(30)));

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        let err = NotifierError::from_response("slack", 429, &headers, "");
        assert_eq!(err.retry_after, None);
    }
}
