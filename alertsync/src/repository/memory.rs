//! In-process repository backend
//!
//! All three repositories share one [`MemoryStore`], so deleting an alert
//! cascades to its acknowledgment history the same way the SQL backends do.
//! Silences live in a [`SilenceIndex`], so matching does not scan every
//! silence per alert.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::error::{RepositoryError, RepositoryOperation};
use super::traits::{AckEventRepository, AlertRepository, RepositoryResult, SilenceRepository};
use crate::domain::{AckEvent, Alert, AlertState, SilenceMark};
use crate::ids::{AckEventId, AlertId, SilenceId};
use crate::matching::SilenceIndex;

#[derive(Debug, Default)]
struct MemoryState {
    alerts: HashMap<AlertId, Alert>,
    /// Per-alert history kept sorted by `created_at`
    ack_events: HashMap<AlertId, Vec<AckEvent>>,
    ack_owner: HashMap<AckEventId, AlertId>,
    silences: SilenceIndex,
}

/// Repositories backed by process memory
///
/// Writers take the lock exclusively, so the version check and the write
/// happen atomically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertRepository for MemoryStore {
    async fn save(&self, alert: &Alert) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        if state.alerts.contains_key(&alert.id) {
            return Err(RepositoryError::already_exists("Alert", alert.id.as_str()));
        }
        state.alerts.insert(alert.id.clone(), alert.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &AlertId) -> RepositoryResult<Option<Alert>> {
        Ok(self.state.read().await.alerts.get(id).cloned())
    }

    async fn find_open_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> RepositoryResult<Option<Alert>> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .values()
            .filter(|a| a.is_open() && a.fingerprint == fingerprint)
            .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
            .cloned())
    }

    async fn find_by_external_reference(
        &self,
        destination: &str,
        reference: &str,
    ) -> RepositoryResult<Option<Alert>> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .values()
            .find(|a| a.external_reference(destination) == Some(reference))
            .cloned())
    }

    async fn find_by_state(
        &self,
        alert_state: AlertState,
        limit: usize,
    ) -> RepositoryResult<Vec<Alert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| a.state == alert_state)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        alerts.truncate(limit);
        Ok(alerts)
    }

    async fn update(&self, alert: &Alert) -> RepositoryResult<Alert> {
        let mut state = self.state.write().await;
        let stored = state.alerts.get_mut(&alert.id).ok_or_else(|| {
            RepositoryError::not_found("Alert", alert.id.as_str())
                .with_operation(RepositoryOperation::Update)
        })?;

        if stored.version != alert.version {
            return Err(RepositoryError::concurrent_update(
                "Alert",
                alert.id.as_str(),
                alert.version,
            ));
        }

        let mut next = alert.clone();
        next.version = alert.version + 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: &AlertId) -> RepositoryResult<bool> {
        let mut state = self.state.write().await;
        if state.alerts.remove(id).is_none() {
            return Ok(false);
        }
        if let Some(events) = state.ack_events.remove(id) {
            for event in events {
                state.ack_owner.remove(&event.id);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl AckEventRepository for MemoryStore {
    async fn save(&self, event: &AckEvent) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        if !state.alerts.contains_key(&event.alert_id) {
            return Err(RepositoryError::not_found("Alert", event.alert_id.as_str())
                .with_operation(RepositoryOperation::Save));
        }
        if state.ack_owner.contains_key(&event.id) {
            return Err(RepositoryError::already_exists("AckEvent", event.id.as_str()));
        }

        state
            .ack_owner
            .insert(event.id.clone(), event.alert_id.clone());
        let history = state.ack_events.entry(event.alert_id.clone()).or_default();
        let position = history.partition_point(|e| e.created_at <= event.created_at);
        history.insert(position, event.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &AckEventId) -> RepositoryResult<Option<AckEvent>> {
        let state = self.state.read().await;
        Ok(state
            .ack_owner
            .get(id)
            .and_then(|alert_id| state.ack_events.get(alert_id))
            .and_then(|events| events.iter().find(|e| &e.id == id))
            .cloned())
    }

    async fn find_by_alert(&self, alert_id: &AlertId) -> RepositoryResult<Vec<AckEvent>> {
        let state = self.state.read().await;
        Ok(state.ack_events.get(alert_id).cloned().unwrap_or_default())
    }

    async fn latest_for_alert(&self, alert_id: &AlertId) -> RepositoryResult<Option<AckEvent>> {
        let state = self.state.read().await;
        Ok(state
            .ack_events
            .get(alert_id)
            .and_then(|events| events.last())
            .cloned())
    }
}

#[async_trait]
impl SilenceRepository for MemoryStore {
    async fn save(&self, silence: &SilenceMark) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        if state.silences.contains(&silence.id) {
            return Err(RepositoryError::already_exists(
                "SilenceMark",
                silence.id.as_str(),
            ));
        }
        state.silences.upsert(silence.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &SilenceId) -> RepositoryResult<Option<SilenceMark>> {
        Ok(self.state.read().await.silences.get(id).cloned())
    }

    async fn find_active(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<SilenceMark>> {
        let state = self.state.read().await;
        let mut active: Vec<SilenceMark> = state
            .silences
            .iter()
            .filter(|s| s.is_active(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn find_matching_alert(
        &self,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<SilenceMark>> {
        Ok(self.state.read().await.silences.find_matching(alert, now))
    }

    async fn update(&self, silence: &SilenceMark) -> RepositoryResult<SilenceMark> {
        let mut state = self.state.write().await;
        let stored_version = state
            .silences
            .get(&silence.id)
            .map(|s| s.version)
            .ok_or_else(|| {
                RepositoryError::not_found("SilenceMark", silence.id.as_str())
                    .with_operation(RepositoryOperation::Update)
            })?;

        if stored_version != silence.version {
            return Err(RepositoryError::concurrent_update(
                "SilenceMark",
                silence.id.as_str(),
                silence.version,
            ));
        }

        let mut next = silence.clone();
        next.version = silence.version + 1;
        state.silences.upsert(next.clone());
        Ok(next)
    }

    async fn delete(&self, id: &SilenceId) -> RepositoryResult<bool> {
        Ok(self.state.write().await.silences.remove(id).is_some())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let removed = self.state.write().await.silences.remove_expired(now);
        Ok(removed as u64)
    }
}
