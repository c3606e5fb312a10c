//! Repository error types
//!
//! Every backend converts its native errors into [`RepositoryError`] at the
//! boundary, so callers decide retry versus abort from the kind alone.
//!
//! ```rust
//! use alertsync::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::concurrent_update("Alert", "alert_123", 4);
//! assert_eq!(error.kind, RepositoryErrorKind::ConcurrentUpdate);
//! assert!(error.is_concurrent_update());
//! ```

use std::fmt;

use thiserror::Error;

/// What the repository was doing when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Opening the store or creating the schema
    Initialize,
    Save,
    FindById,
    /// Any other finder
    Find,
    /// Optimistically locked write
    Update,
    Delete,
    DeleteExpired,
}

impl RepositoryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Save => "save",
            Self::FindById => "find_by_id",
            Self::Find => "find",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::DeleteExpired => "delete_expired",
        }
    }
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    NotFound,
    /// Duplicate primary key
    AlreadyExists,
    /// The stored version moved on since the caller read it
    ConcurrentUpdate,
    /// Foreign key or check constraint, e.g. an ack event for a missing alert
    ConstraintViolation,
    ValidationFailed,
    ConnectionFailed,
    /// Includes SQLite busy/locked and Postgres serialization failures
    Timeout,
    DatabaseError,
    /// A stored row could not be decoded into a domain value
    SerializationError,
    Other,
}

impl RepositoryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::ConcurrentUpdate => "concurrent_update",
            Self::ConstraintViolation => "constraint_violation",
            Self::ValidationFailed => "validation_failed",
            Self::ConnectionFailed => "connection_failed",
            Self::Timeout => "timeout",
            Self::DatabaseError => "database_error",
            Self::SerializationError => "serialization_error",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record an error is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    /// `Alert`, `AckEvent` or `SilenceMark`
    pub kind: String,
    pub id: String,
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

fn entity_suffix(entity: &Option<EntityRef>) -> String {
    entity
        .as_ref()
        .map(|e| format!(" ({})", e))
        .unwrap_or_default()
}

/// A classified storage failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} on {operation}{suffix}: {message}", suffix = entity_suffix(.entity))]
pub struct RepositoryError {
    pub operation: RepositoryOperation,
    pub kind: RepositoryErrorKind,
    pub message: String,
    pub entity: Option<EntityRef>,
}

impl RepositoryError {
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity: None,
        }
    }

    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(RepositoryOperation::FindById, RepositoryErrorKind::NotFound, "no such record")
            .with_entity(entity_type, entity_id)
    }

    pub fn already_exists(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(RepositoryOperation::Save, RepositoryErrorKind::AlreadyExists, "duplicate ID")
            .with_entity(entity_type, entity_id)
    }

    /// The record exists but `expected_version` is no longer current
    pub fn concurrent_update(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        expected_version: u64,
    ) -> Self {
        Self::new(
            RepositoryOperation::Update,
            RepositoryErrorKind::ConcurrentUpdate,
            format!("version {} is stale", expected_version),
        )
        .with_entity(entity_type, entity_id)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Save,
            RepositoryErrorKind::ValidationFailed,
            message,
        )
    }

    pub fn constraint_violation(
        operation: RepositoryOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::new(operation, RepositoryErrorKind::ConstraintViolation, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Initialize,
            RepositoryErrorKind::ConnectionFailed,
            message,
        )
    }

    pub fn timeout(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::Timeout, message)
    }

    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::DatabaseError, message)
    }

    pub fn serialization_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::SerializationError, message)
    }

    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity = Some(EntityRef {
            kind: entity_type.into(),
            id: entity_id.into(),
        });
        self
    }

    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::NotFound
    }

    /// The write lost an optimistic lock; reload, reapply, write again
    pub fn is_concurrent_update(&self) -> bool {
        self.kind == RepositoryErrorKind::ConcurrentUpdate
    }
}

/// Only transport-level failures are retried in place. A version conflict
/// needs a reload first, which the executor cannot do.
impl crate::resilience::Retryable for RepositoryError {
    fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
        )
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(RepositoryOperation::Find, err.to_string())
    }
}
