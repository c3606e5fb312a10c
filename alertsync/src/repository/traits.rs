//! Repository trait definitions
//!
//! The traits are object safe (via `async_trait`) so the service layer can
//! hold `Arc<dyn AlertRepository>` and swap backends at startup.
//!
//! # Update contract
//!
//! Every `update` is optimistically locked. The caller passes the record as
//! it was read, including its `version`. The backend writes only if the
//! stored version still equals that value, increments it, and returns the
//! stored copy. A mismatch yields [`RepositoryErrorKind::ConcurrentUpdate`];
//! a missing record yields [`RepositoryErrorKind::NotFound`].
//!
//! [`RepositoryErrorKind::ConcurrentUpdate`]: super::RepositoryErrorKind::ConcurrentUpdate
//! [`RepositoryErrorKind::NotFound`]: super::RepositoryErrorKind::NotFound

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::error::RepositoryError;
use crate::domain::{AckEvent, Alert, AlertState, SilenceMark};
use crate::ids::{AckEventId, AlertId, SilenceId};

/// Result type for repository operations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Persistence for [`Alert`] records
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Insert a new alert
    ///
    /// Fails with `AlreadyExists` when the ID is taken.
    async fn save(&self, alert: &Alert) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: &AlertId) -> RepositoryResult<Option<Alert>>;

    /// The open (active or acked) alert carrying this fingerprint
    ///
    /// When several exist the most recently created wins.
    async fn find_open_by_fingerprint(&self, fingerprint: &str)
        -> RepositoryResult<Option<Alert>>;

    /// Reverse lookup from a destination's message reference
    async fn find_by_external_reference(
        &self,
        destination: &str,
        reference: &str,
    ) -> RepositoryResult<Option<Alert>>;

    /// Alerts in the given state, oldest first
    async fn find_by_state(&self, state: AlertState, limit: usize)
        -> RepositoryResult<Vec<Alert>>;

    /// Optimistically locked write; returns the stored copy with the new version
    async fn update(&self, alert: &Alert) -> RepositoryResult<Alert>;

    /// Remove the alert and its acknowledgment history
    ///
    /// Returns `false` if nothing was deleted.
    async fn delete(&self, id: &AlertId) -> RepositoryResult<bool>;
}

/// Append-only persistence for [`AckEvent`] records
#[async_trait]
pub trait AckEventRepository: Send + Sync {
    /// Append an event; the referenced alert must exist
    async fn save(&self, event: &AckEvent) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: &AckEventId) -> RepositoryResult<Option<AckEvent>>;

    /// Full history for one alert, ordered by `created_at`
    async fn find_by_alert(&self, alert_id: &AlertId) -> RepositoryResult<Vec<AckEvent>>;

    async fn latest_for_alert(&self, alert_id: &AlertId) -> RepositoryResult<Option<AckEvent>>;
}

/// Persistence for [`SilenceMark`] records
#[async_trait]
pub trait SilenceRepository: Send + Sync {
    async fn save(&self, silence: &SilenceMark) -> RepositoryResult<()>;

    async fn find_by_id(&self, id: &SilenceId) -> RepositoryResult<Option<SilenceMark>>;

    /// Silences whose window contains `now`
    async fn find_active(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<SilenceMark>>;

    /// Active silences that match the alert, ordered by ID
    async fn find_matching_alert(
        &self,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<SilenceMark>>;

    /// Optimistically locked write; returns the stored copy with the new version
    async fn update(&self, silence: &SilenceMark) -> RepositoryResult<SilenceMark>;

    async fn delete(&self, id: &SilenceId) -> RepositoryResult<bool>;

    /// Remove every silence with `end_at <= now`; returns how many went
    async fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;
}

/// The three repositories a service context needs
#[derive(Clone)]
pub struct Repositories {
    pub alerts: Arc<dyn AlertRepository>,
    pub ack_events: Arc<dyn AckEventRepository>,
    pub silences: Arc<dyn SilenceRepository>,
}

impl Repositories {
    /// Share one backend that implements all three traits
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AlertRepository + AckEventRepository + SilenceRepository + 'static,
    {
        Self {
            alerts: store.clone(),
            ack_events: store.clone(),
            silences: store,
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
