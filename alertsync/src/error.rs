//! Error types and retry classification

use thiserror::Error;

use crate::domain::InvalidTransition;
use crate::notifier::NotifierError;
use crate::repository::{RepositoryError, RepositoryErrorKind};
use crate::resilience::{ResilienceError, Retryable};

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Caller-facing error taxonomy
///
/// Every [`Error`] maps onto exactly one class, so handlers and the retry
/// executor never need to look at transport details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The referenced record does not exist
    NotFound,
    /// A record with the same key already exists
    AlreadyExists,
    /// Optimistic lock lost; reload and retry
    ConcurrentUpdate,
    /// State machine violation; never retried
    InvalidTransition,
    /// Network, 5xx, 429, busy store; retried by the executor
    Transient,
    /// 4xx, auth, validation; never retried
    Permanent,
    /// The caller's cancellation signal fired
    Cancelled,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::ConcurrentUpdate => "concurrent_update",
            Self::InvalidTransition => "invalid_transition",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Main error type
///
/// Large variants are boxed to keep the enum small
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration or request values failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Structured storage error
    #[error("{0}")]
    Repository(RepositoryError),

    /// Destination adapter error
    #[error("{0}")]
    Notifier(NotifierError),

    /// No alert resolves from the given reference
    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    /// No silence with the given ID
    #[error("Silence not found: {0}")]
    SilenceNotFound(String),

    /// Lifecycle state machine violation
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Call rejected by an open circuit breaker
    #[error("Circuit breaker open: {0}")]
    CircuitOpen(String),

    /// Cancellation signal fired before the operation finished
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Place the error in the caller-facing taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_) | Error::Validation(_) | Error::Internal(_) => ErrorClass::Permanent,
            Error::Repository(e) => match e.kind {
                RepositoryErrorKind::NotFound => ErrorClass::NotFound,
                RepositoryErrorKind::AlreadyExists => ErrorClass::AlreadyExists,
                RepositoryErrorKind::ConcurrentUpdate => ErrorClass::ConcurrentUpdate,
                RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout => {
                    ErrorClass::Transient
                }
                _ => ErrorClass::Permanent,
            },
            Error::Notifier(e) if e.is_cancelled() => ErrorClass::Cancelled,
            Error::Notifier(e) if e.is_retryable() => ErrorClass::Transient,
            Error::Notifier(_) => ErrorClass::Permanent,
            Error::AlertNotFound(_) | Error::SilenceNotFound(_) => ErrorClass::NotFound,
            Error::InvalidTransition(_) => ErrorClass::InvalidTransition,
            Error::CircuitOpen(_) => ErrorClass::Transient,
            Error::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Whether a caller may retry the whole operation
    ///
    /// Broader than [`Retryable::is_retryable`]: version conflicts and open
    /// circuits are worth retrying later, but not inside the executor loop.
    pub fn is_retryable_by_caller(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transient | ErrorClass::ConcurrentUpdate
        )
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Repository(e) => matches!(
                e.kind,
                RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
            ),
            Error::Notifier(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Error::Notifier(e) => e.retry_after,
            _ => None,
        }
    }
}

impl ResilienceError for Error {
    fn cancelled() -> Self {
        Error::Cancelled
    }

    fn circuit_open(name: &str) -> Self {
        Error::CircuitOpen(name.to_string())
    }

    fn is_cancellation(&self) -> bool {
        self.class() == ErrorClass::Cancelled
    }
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        Error::Repository(err)
    }
}

impl From<NotifierError> for Error {
    fn from(err: NotifierError) -> Self {
        match err.kind {
            crate::notifier::NotifierErrorKind::Cancelled => Error::Cancelled,
            _ => Error::Notifier(err),
        }
    }
}
