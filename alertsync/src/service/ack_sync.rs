//! Acknowledgment synchronization
//!
//! An ack or resolve arrives from exactly one place. The canonical alert
//! is transitioned and the audit event appended first; only then are the
//! other ack-capable destinations told. The originating destination is
//! never called back, which keeps two-way integrations from echoing.

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{summarize, update_alert};
use crate::context::ServiceContext;
use crate::domain::{AckEvent, Actor, Alert, Source};
use crate::error::{Error, Result};
use crate::ids::AlertId;
use crate::notifier::{Destinations, FanOutReport};
use crate::resilience::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckAction {
    Acknowledge,
    Resolve,
}

impl AckAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acknowledge => "acknowledge",
            Self::Resolve => "resolve",
        }
    }
}

/// How the caller names the alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertRef {
    Id(AlertId),
    /// A destination's own handle, e.g. a Slack message ts
    External {
        destination: String,
        reference: String,
    },
}

impl AlertRef {
    pub fn external(destination: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::External {
            destination: destination.into(),
            reference: reference.into(),
        }
    }
}

impl From<AlertId> for AlertRef {
    fn from(id: AlertId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for AlertRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::External {
                destination,
                reference,
            } => write!(f, "{}:{}", destination, reference),
        }
    }
}

/// One inbound ack or resolve signal
#[derive(Debug, Clone)]
pub struct AckRequest {
    pub alert: AlertRef,
    pub action: AckAction,
    pub source: Source,
    pub actor: Actor,
    pub note: Option<String>,
    /// Silence length chosen in the acknowledging UI; recorded, not acted on
    pub duration: Option<Duration>,
}

impl AckRequest {
    pub fn acknowledge(alert: impl Into<AlertRef>, source: Source, actor: Actor) -> Self {
        Self {
            alert: alert.into(),
            action: AckAction::Acknowledge,
            source,
            actor,
            note: None,
            duration: None,
        }
    }

    pub fn resolve(alert: impl Into<AlertRef>, source: Source, actor: Actor) -> Self {
        Self {
            action: AckAction::Resolve,
            ..Self::acknowledge(alert, source, actor)
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

#[derive(Debug)]
pub struct AckOutcome {
    /// Stored alert after the transition
    pub alert: Alert,
    pub event: AckEvent,
    /// False when the alert was already acknowledged
    pub changed: bool,
    pub fan_out: FanOutReport,
}

#[derive(Debug, Clone)]
pub struct AckSynchronizer {
    ctx: ServiceContext,
}

impl AckSynchronizer {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Make the signal authoritative and propagate it
    ///
    /// Succeeds once the transition and the audit event are stored; failed
    /// destination calls are logged and reported in
    /// [`AckOutcome::fan_out`]. Acknowledging a resolved alert fails with
    /// [`Error::InvalidTransition`]. Two version conflicts in a row surface
    /// as a `ConcurrentUpdate` repository error, and nothing is recorded.
    /// A failed event write is returned after in-place retries; the request
    /// can then be replayed as is.
    pub async fn sync_ack(
        &self,
        request: AckRequest,
        cancel: &CancellationToken,
    ) -> Result<AckOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let alert = self.find(&request.alert).await?;
        let now = self.ctx.now();
        let acked_by = request
            .actor
            .display_name()
            .unwrap_or(request.source.as_str())
            .to_string();

        let (alert, changed) = update_alert(self.ctx.alerts(), alert, |a| {
            let changed = match request.action {
                AckAction::Acknowledge => a.acknowledge(acked_by.as_str(), now)?,
                AckAction::Resolve => {
                    a.resolve(now);
                    true
                }
            };
            if changed {
                a.updated_at = now;
            }
            Ok(changed)
        })
        .await?;

        let event = AckEvent::new(
            alert.id.clone(),
            request.source,
            &request.actor,
            request.note,
            request.duration,
            now,
        );
        self.record_event(&alert, &event, request.action, changed, cancel)
            .await?;

        tracing::info!(
            alert_id = %alert.id,
            action = request.action.as_str(),
            source = %request.source,
            acked_by = %acked_by,
            changed,
            "Acknowledgment recorded"
        );

        let targets = self
            .ctx
            .destinations()
            .ack_targets(request.source.as_str());
        let deliveries = {
            let (alert, event) = (&alert, &event);
            let action = request.action;
            Destinations::broadcast(targets, |notifier| async move {
                match action {
                    AckAction::Acknowledge => notifier.acknowledge(alert, event, cancel).await,
                    AckAction::Resolve => notifier.resolve(alert, cancel).await,
                }
            })
            .await
        };
        let fan_out = summarize(&alert.id, request.action.as_str(), &deliveries);

        if cancel.is_cancelled() {
            // Transition and event are stored; propagation was cut short
            return Err(Error::Cancelled);
        }

        Ok(AckOutcome {
            alert,
            event,
            changed,
            fan_out,
        })
    }

    /// Append the audit event, retrying transient storage failures
    ///
    /// The transition is already stored at this point. If the event still
    /// cannot be written the error goes back to the caller, and replaying
    /// the same request is safe: a repeated ack changes nothing on the
    /// alert and only appends the missing event.
    async fn record_event(
        &self,
        alert: &Alert,
        event: &AckEvent,
        action: AckAction,
        changed: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ack_events = self.ctx.ack_events();
        let saved = RetryPolicy::from(&self.ctx.config().retry)
            .execute(cancel, move |_| async move {
                ack_events.save(event).await.map_err(Error::from)
            })
            .await;

        if let Err(e) = &saved {
            tracing::error!(
                alert_id = %alert.id,
                event_id = %event.id,
                action = action.as_str(),
                changed,
                error = %e,
                "Alert transition stored without its ack event"
            );
        }
        saved
    }

    async fn find(&self, alert_ref: &AlertRef) -> Result<Alert> {
        let found = match alert_ref {
            AlertRef::Id(id) => self.ctx.alerts().find_by_id(id).await?,
            AlertRef::External {
                destination,
                reference,
            } => {
                self.ctx
                    .alerts()
                    .find_by_external_reference(destination, reference)
                    .await?
            }
        };
        found.ok_or_else(|| Error::AlertNotFound(alert_ref.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AlertState;
    use crate::error::ErrorClass;
    use crate::notifier::testing::Call;
    use crate::notifier::NotifierError;
    use crate::ids::AckEventId;
    use crate::repository::{
        AckEventRepository, AlertRepository, MemoryStore, Repositories, RepositoryError,
        RepositoryOperation, RepositoryResult,
    };
    use crate::service::fixtures::{harness, harness_with, report, t0, test_config, Harness};
    use crate::service::{AlertIngestor, IngestOutcome};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Every update loses its optimistic lock
    struct AlwaysStale(Arc<MemoryStore>);

    #[async_trait]
    impl AlertRepository for AlwaysStale {
        async fn save(&self, alert: &Alert) -> RepositoryResult<()> {
            AlertRepository::save(self.0.as_ref(), alert).await
        }

        async fn find_by_id(&self, id: &AlertId) -> RepositoryResult<Option<Alert>> {
            AlertRepository::find_by_id(self.0.as_ref(), id).await
        }

        async fn find_open_by_fingerprint(
            &self,
            fingerprint: &str,
        ) -> RepositoryResult<Option<Alert>> {
            self.0.find_open_by_fingerprint(fingerprint).await
        }

        async fn find_by_external_reference(
            &self,
            destination: &str,
            reference: &str,
        ) -> RepositoryResult<Option<Alert>> {
            self.0.find_by_external_reference(destination, reference).await
        }

        async fn find_by_state(
            &self,
            state: AlertState,
            limit: usize,
        ) -> RepositoryResult<Vec<Alert>> {
            self.0.find_by_state(state, limit).await
        }

        async fn update(&self, alert: &Alert) -> RepositoryResult<Alert> {
            Err(RepositoryError::concurrent_update(
                "Alert",
                alert.id.as_str(),
                alert.version,
            ))
        }

        async fn delete(&self, id: &AlertId) -> RepositoryResult<bool> {
            AlertRepository::delete(self.0.as_ref(), id).await
        }
    }

    /// Event writes time out while `failures` is above zero
    struct FlakyAckEvents {
        inner: Arc<MemoryStore>,
        failures: AtomicU32,
        attempts: AtomicU32,
    }

    impl FlakyAckEvents {
        fn new(inner: Arc<MemoryStore>, failures: u32) -> Self {
            Self {
                inner,
                failures: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AckEventRepository for FlakyAckEvents {
        async fn save(&self, event: &AckEvent) -> RepositoryResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RepositoryError::timeout(
                    RepositoryOperation::Save,
                    "database is locked",
                ));
            }
            AckEventRepository::save(self.inner.as_ref(), event).await
        }

        async fn find_by_id(&self, id: &AckEventId) -> RepositoryResult<Option<AckEvent>> {
            AckEventRepository::find_by_id(self.inner.as_ref(), id).await
        }

        async fn find_by_alert(&self, alert_id: &AlertId) -> RepositoryResult<Vec<AckEvent>> {
            self.inner.find_by_alert(alert_id).await
        }

        async fn latest_for_alert(&self, alert_id: &AlertId) -> RepositoryResult<Option<AckEvent>> {
            self.inner.latest_for_alert(alert_id).await
        }
    }

    fn with_ack_events(store: &Arc<MemoryStore>, ack_events: Arc<FlakyAckEvents>) -> Repositories {
        Repositories {
            ack_events,
            ..Repositories::from_store(store.clone())
        }
    }

    fn slack_user() -> Actor {
        Actor::new("U024BE7LH", "dana@example.com", "Dana")
    }

    async fn open_alert(h: &Harness, fingerprint: &str) -> Alert {
        AlertIngestor::new(h.ctx.clone())
            .ingest(&report(fingerprint, h.ctx.now()), &CancellationToken::new())
            .await
            .unwrap()
            .alert
            .unwrap()
    }

    fn acks(calls: &[Call]) -> usize {
        calls
            .iter()
            .filter(|c| matches!(c, Call::Acknowledge(..)))
            .count()
    }

    #[tokio::test]
    async fn test_fp1_scenario_end_to_end() {
        let h = harness().await;
        let ingestor = AlertIngestor::new(h.ctx.clone());
        let cancel = CancellationToken::new();

        let first = ingestor.ingest(&report("fp-1", t0()), &cancel).await.unwrap();
        assert_eq!(first.outcome, IngestOutcome::Created);

        h.clock.advance(ChronoDuration::seconds(50));
        let dup = ingestor
            .ingest(&report("fp-1", t0() + ChronoDuration::seconds(50)), &cancel)
            .await
            .unwrap();
        assert_eq!(dup.outcome, IngestOutcome::Deduplicated);

        h.clock.set(t0() + ChronoDuration::minutes(40));
        let resend = ingestor
            .ingest(&report("fp-1", t0() + ChronoDuration::minutes(40)), &cancel)
            .await
            .unwrap();
        assert_eq!(resend.outcome, IngestOutcome::Renotified);

        let slack_ts = resend
            .alert
            .as_ref()
            .and_then(|a| a.external_reference("slack"))
            .unwrap()
            .to_string();
        assert_eq!(
            first.alert.as_ref().and_then(|a| a.external_reference("slack")),
            Some(slack_ts.as_str())
        );

        h.clock.set(t0() + ChronoDuration::minutes(41));
        let request = AckRequest::acknowledge(
            AlertRef::external("slack", slack_ts),
            Source::Slack,
            slack_user(),
        )
        .with_note("investigating");
        let outcome = AckSynchronizer::new(h.ctx.clone())
            .sync_ack(request, &cancel)
            .await
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.alert.state, AlertState::Acked);
        assert_eq!(outcome.alert.acked_by.as_deref(), Some("Dana"));
        assert_eq!(outcome.alert.acked_at, Some(t0() + ChronoDuration::minutes(41)));
        assert_eq!(outcome.fan_out.delivered, vec!["pagerduty".to_string()]);

        let events = h.ctx.ack_events().find_by_alert(&outcome.alert.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].note.as_deref(), Some("investigating"));
        assert_eq!(events[0].source, Source::Slack);

        assert_eq!(acks(&h.pagerduty.calls()), 1);
        assert_eq!(acks(&h.slack.calls()), 0);

        let notifications = h
            .slack
            .calls()
            .iter()
            .filter(|c| matches!(c, Call::Notify(_)))
            .count();
        assert_eq!(notifications, 2);
        let stored = h.ctx.alerts().find_by_state(AlertState::Acked, 10).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_pagerduty_ack_is_not_echoed_back() {
        let h = harness().await;
        let alert = open_alert(&h, "fp-echo").await;

        let outcome = AckSynchronizer::new(h.ctx.clone())
            .sync_ack(
                AckRequest::acknowledge(alert.id.clone(), Source::PagerDuty, Actor::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(acks(&h.pagerduty.calls()), 0);
        assert_eq!(acks(&h.slack.calls()), 1);
        // No actor details: fall back to the source name
        assert_eq!(outcome.alert.acked_by.as_deref(), Some("pagerduty"));
    }

    #[tokio::test]
    async fn test_api_ack_reaches_every_ack_destination() {
        let h = harness().await;
        let alert = open_alert(&h, "fp-api").await;

        let outcome = AckSynchronizer::new(h.ctx.clone())
            .sync_ack(
                AckRequest::acknowledge(alert.id, Source::Api, slack_user()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.fan_out.delivered.len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_ack_keeps_first_acknowledger() {
        let h = harness().await;
        let alert = open_alert(&h, "fp-twice").await;
        let sync = AckSynchronizer::new(h.ctx.clone());
        let cancel = CancellationToken::new();

        sync.sync_ack(
            AckRequest::acknowledge(alert.id.clone(), Source::Slack, slack_user()),
            &cancel,
        )
        .await
        .unwrap();
        h.clock.advance(ChronoDuration::minutes(2));
        let second = sync
            .sync_ack(
                AckRequest::acknowledge(
                    alert.id.clone(),
                    Source::Api,
                    Actor::new("", "", "Sam"),
                ),
                &cancel,
            )
            .await
            .unwrap();

        assert!(!second.changed);
        assert_eq!(second.alert.acked_by.as_deref(), Some("Dana"));
        assert_eq!(second.alert.acked_at, Some(t0()));
        // Both signals are audited
        let events = h.ctx.ack_events().find_by_alert(&alert.id).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_then_ack_is_invalid_transition() {
        let h = harness().await;
        let alert = open_alert(&h, "fp-resolved").await;
        let sync = AckSynchronizer::new(h.ctx.clone());
        let cancel = CancellationToken::new();

        let resolved = sync
            .sync_ack(
                AckRequest::resolve(alert.id.clone(), Source::PagerDuty, Actor::default()),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(resolved.alert.state, AlertState::Resolved);
        assert!(h.slack.calls().contains(&Call::Resolve(alert.id.to_string())));
        assert!(!h.pagerduty.calls().contains(&Call::Resolve(alert.id.to_string())));

        let err = sync
            .sync_ack(
                AckRequest::acknowledge(alert.id.clone(), Source::Slack, slack_user()),
                &cancel,
            )
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidTransition);

        let stored = h.ctx.alerts().find_by_id(&alert.id).await.unwrap().unwrap();
        assert_eq!(stored.state, AlertState::Resolved);
    }

    #[tokio::test]
    async fn test_unknown_reference_is_not_found() {
        let h = harness().await;
        let err = AckSynchronizer::new(h.ctx.clone())
            .sync_ack(
                AckRequest::acknowledge(
                    AlertRef::external("slack", "1700000000.000100"),
                    Source::Slack,
                    slack_user(),
                ),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlertNotFound(ref r) if r == "slack:1700000000.000100"));
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test]
    async fn test_destination_failure_keeps_ack_durable() {
        let h = harness().await;
        let alert = open_alert(&h, "fp-partial").await;
        h.pagerduty
            .fail_with(NotifierError::http("pagerduty", 401, "invalid credentials"));

        let outcome = AckSynchronizer::new(h.ctx.clone())
            .sync_ack(
                AckRequest::acknowledge(alert.id.clone(), Source::Slack, slack_user())
                    .with_duration(Duration::from_secs(3600)),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.fan_out.is_complete());
        assert_eq!(outcome.fan_out.failed[0].destination, "pagerduty");
        assert_eq!(outcome.event.duration, Some(Duration::from_secs(3600)));

        let stored = h.ctx.alerts().find_by_id(&alert.id).await.unwrap().unwrap();
        assert_eq!(stored.state, AlertState::Acked);
        // The duration does not create a silence on its own
        assert!(h.ctx.silences().find_active(h.ctx.now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ack_through_original_message_after_resend() {
        let h = harness().await;
        let ingestor = AlertIngestor::new(h.ctx.clone());
        let cancel = CancellationToken::new();

        let created = ingestor.ingest(&report("fp-thread", t0()), &cancel).await.unwrap();
        let first_ts = created
            .alert
            .as_ref()
            .and_then(|a| a.external_reference("slack"))
            .unwrap()
            .to_string();

        h.clock.advance(ChronoDuration::minutes(40));
        let resend = ingestor
            .ingest(&report("fp-thread", t0() + ChronoDuration::minutes(40)), &cancel)
            .await
            .unwrap();
        assert_eq!(resend.outcome, IngestOutcome::Renotified);

        let outcome = AckSynchronizer::new(h.ctx.clone())
            .sync_ack(
                AckRequest::acknowledge(
                    AlertRef::external("slack", first_ts),
                    Source::Slack,
                    slack_user(),
                ),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(outcome.alert.id, created.alert.unwrap().id);
        assert_eq!(outcome.alert.state, AlertState::Acked);
    }

    #[tokio::test]
    async fn test_second_conflict_is_returned_to_caller() {
        let store = Arc::new(MemoryStore::new());
        let repositories = Repositories {
            alerts: Arc::new(AlwaysStale(store.clone())),
            ..Repositories::from_store(store.clone())
        };
        let h = harness_with(test_config(), repositories).await;
        let alert = Alert::from_report(&report("fp-stale", t0()), t0());
        h.ctx.alerts().save(&alert).await.unwrap();

        let err = AckSynchronizer::new(h.ctx.clone())
            .sync_ack(
                AckRequest::acknowledge(alert.id.clone(), Source::Slack, slack_user()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.class(), ErrorClass::ConcurrentUpdate);
        assert!(err.is_retryable_by_caller());
        assert!(h.ctx.ack_events().find_by_alert(&alert.id).await.unwrap().is_empty());
        assert_eq!(acks(&h.pagerduty.calls()), 0);
    }

    #[tokio::test]
    async fn test_event_write_retries_transient_failure() {
        let store = Arc::new(MemoryStore::new());
        let ack_events = Arc::new(FlakyAckEvents::new(store.clone(), 1));
        let mut config = test_config();
        config.retry.max_retries = 2;
        let h = harness_with(config, with_ack_events(&store, ack_events.clone())).await;
        let alert = open_alert(&h, "fp-blip").await;

        let outcome = AckSynchronizer::new(h.ctx.clone())
            .sync_ack(
                AckRequest::acknowledge(alert.id.clone(), Source::Slack, slack_user()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(ack_events.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(h.ctx.ack_events().find_by_alert(&alert.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_event_write_can_be_replayed() {
        let store = Arc::new(MemoryStore::new());
        let ack_events = Arc::new(FlakyAckEvents::new(store.clone(), u32::MAX));
        let h = harness_with(test_config(), with_ack_events(&store, ack_events.clone())).await;
        let alert = open_alert(&h, "fp-audit").await;
        let sync = AckSynchronizer::new(h.ctx.clone());
        let request = AckRequest::acknowledge(alert.id.clone(), Source::Slack, slack_user());

        let err = sync
            .sync_ack(request.clone(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retryable_by_caller());
        // Nobody was told about an ack that has no audit record
        assert_eq!(acks(&h.pagerduty.calls()), 0);
        let stored = h.ctx.alerts().find_by_id(&alert.id).await.unwrap().unwrap();
        assert_eq!(stored.state, AlertState::Acked);

        ack_events.failures.store(0, Ordering::SeqCst);
        h.clock.advance(ChronoDuration::minutes(1));
        let replayed = sync
            .sync_ack(request, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!replayed.changed);
        assert_eq!(replayed.alert.acked_by.as_deref(), Some("Dana"));
        assert_eq!(replayed.alert.acked_at, Some(t0()));
        let events = h.ctx.ack_events().find_by_alert(&alert.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(acks(&h.pagerduty.calls()), 1);
    }
}
