//! Per-destination retry and circuit breaking

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{Notifier, NotifierError, NotifierResult};
use crate::domain::{AckEvent, Alert};
use crate::resilience::{CircuitBreaker, CircuitBreakerSettings, RetryPolicy};

/// One destination adapter behind its own breaker and retry policy
///
/// The breaker guards each attempt, so an opening circuit cuts a retry
/// sequence short. Every call races the caller's cancellation token.
pub struct ResilientNotifier {
    inner: Arc<dyn Notifier>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ResilientNotifier {
    pub fn new(inner: Arc<dyn Notifier>, breaker: CircuitBreakerSettings, retry: RetryPolicy) -> Self {
        let breaker = CircuitBreaker::new(inner.name(), breaker);
        Self {
            inner,
            breaker,
            retry,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn supports_ack(&self) -> bool {
        self.inner.acknowledger().is_some()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn notify(&self, alert: &Alert, cancel: &CancellationToken) -> NotifierResult<String> {
        let inner = &self.inner;
        let breaker = &self.breaker;
        self.retry
            .execute(cancel, move |_| breaker.call(move || inner.notify(alert)))
            .await
            .map_err(|e| e.with_destination(self.name()))
    }

    pub async fn remind(
        &self,
        reference: &str,
        alert: &Alert,
        cancel: &CancellationToken,
    ) -> NotifierResult<String> {
        let inner = &self.inner;
        let breaker = &self.breaker;
        self.retry
            .execute(cancel, move |_| breaker.call(move || inner.remind(reference, alert)))
            .await
            .map_err(|e| e.with_destination(self.name()))
    }

    pub async fn update_message(
        &self,
        reference: &str,
        alert: &Alert,
        cancel: &CancellationToken,
    ) -> NotifierResult<()> {
        let inner = &self.inner;
        let breaker = &self.breaker;
        self.retry
            .execute(cancel, move |_| {
                breaker.call(move || inner.update_message(reference, alert))
            })
            .await
            .map_err(|e| e.with_destination(self.name()))
    }

    /// Fails with `Unsupported` when the destination has no ack capability
    pub async fn acknowledge(
        &self,
        alert: &Alert,
        event: &AckEvent,
        cancel: &CancellationToken,
    ) -> NotifierResult<()> {
        let acknowledger = self
            .inner
            .acknowledger()
            .ok_or_else(|| NotifierError::unsupported(self.name(), "acknowledge"))?;
        let breaker = &self.breaker;
        self.retry
            .execute(cancel, move |_| {
                breaker.call(move || acknowledger.acknowledge(alert, event))
            })
            .await
            .map_err(|e| e.with_destination(self.name()))
    }

    /// Fails with `Unsupported` when the destination has no ack capability
    pub async fn resolve(&self, alert: &Alert, cancel: &CancellationToken) -> NotifierResult<()> {
        let acknowledger = self
            .inner
            .acknowledger()
            .ok_or_else(|| NotifierError::unsupported(self.name(), "resolve"))?;
        let breaker = &self.breaker;
        self.retry
            .execute(cancel, move |_| breaker.call(move || acknowledger.resolve(alert)))
            .await
            .map_err(|e| e.with_destination(self.name()))
    }
}

impl std::fmt::Debug for ResilientNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientNotifier")
            .field("name", &self.name())
            .field("breaker", &self.breaker.state())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AlertReport;
    use crate::notifier::testing::{Call, RecordingNotifier};
    use crate::notifier::NotifierErrorKind;
    use crate::resilience::CircuitState;
    use chrono::Utc;
    use std::time::Duration;

    fn alert() -> Alert {
        let report = AlertReport {
            fingerprint: "fp-1".into(),
            name: "HighLatency".into(),
            ..Default::default()
        };
        Alert::from_report(&report, Utc::now())
    }

    fn wrap(inner: Arc<RecordingNotifier>, max_failures: u32, retries: u32) -> ResilientNotifier {
        ResilientNotifier::new(
            inner,
            CircuitBreakerSettings::probing(max_failures, Duration::from_secs(60), 2),
            RetryPolicy::new(Duration::from_millis(10), 2.0, Duration::from_millis(100), retries),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let inner = Arc::new(RecordingNotifier::new("pagerduty", true));
        inner.fail_with(NotifierError::http("pagerduty", 503, "unavailable"));
        let notifier = wrap(inner.clone(), 10, 2);

        let err = notifier
            .resolve(&alert(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, NotifierErrorKind::Server);
        assert_eq!(inner.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_cuts_retries_short() {
        let inner = Arc::new(RecordingNotifier::new("slack", false));
        inner.fail_with(NotifierError::http("slack", 500, "boom"));
        let notifier = wrap(inner.clone(), 2, 5);

        let err = notifier
            .notify(&alert(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, NotifierErrorKind::CircuitOpen);
        assert_eq!(inner.calls().len(), 2);
        assert_eq!(notifier.breaker().state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_ack_without_capability_is_unsupported() {
        let inner = Arc::new(RecordingNotifier::new("slack", false));
        let notifier = wrap(inner.clone(), 3, 0);
        assert!(!notifier.supports_ack());

        let err = notifier
            .resolve(&alert(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, NotifierErrorKind::Unsupported);
        assert!(inner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_error_names_destination() {
        let inner = Arc::new(RecordingNotifier::new("slack", false));
        let notifier = wrap(inner.clone(), 3, 0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = notifier.notify(&alert(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.destination, "slack");
        assert!(inner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_passes_reference_through() {
        let inner = Arc::new(RecordingNotifier::new("slack", false));
        let notifier = wrap(inner.clone(), 3, 0);
        let a = alert();
        let reference = notifier.notify(&a, &CancellationToken::new()).await.unwrap();
        notifier
            .update_message(&reference, &a, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            inner.calls(),
            vec![
                Call::Notify(a.id.to_string()),
                Call::Update(reference, "active".to_string())
            ]
        );
    }
}
