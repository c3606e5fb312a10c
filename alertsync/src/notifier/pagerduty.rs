//! PagerDuty Events API v2 adapter
//!
//! The dedup key is the reference: the alert ID on first trigger, and the
//! stored key afterwards so acknowledge and resolve hit the same incident.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::{headline, Acknowledger, Notifier, NotifierError, NotifierErrorKind, NotifierResult};
use crate::config::PagerDutyConfig;
use crate::domain::{AckEvent, Alert, AlertState};
use crate::error::{Error, Result};

const NAME: &str = "pagerduty";

/// PagerDuty rejects summaries longer than this
const MAX_SUMMARY_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum EventAction {
    Trigger,
    Acknowledge,
    Resolve,
}

#[derive(Debug, Serialize)]
struct Payload<'a> {
    summary: String,
    source: &'a str,
    severity: &'static str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    component: Option<&'a str>,
    custom_details: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct Event<'a> {
    routing_key: &'a str,
    event_action: EventAction,
    dedup_key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Payload<'a>>,
}

#[derive(Debug, Deserialize)]
struct EnqueueResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    dedup_key: Option<String>,
}

pub struct PagerDutyNotifier {
    client: reqwest::Client,
    base_url: String,
    routing_key: String,
}

impl PagerDutyNotifier {
    pub fn new(config: &PagerDutyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                Error::Internal(format!("Failed to build PagerDuty HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            routing_key: config.routing_key.clone(),
        })
    }

    async fn send(&self, event: &Event<'_>) -> NotifierResult<EnqueueResponse> {
        let response = self
            .client
            .post(format!("{}/v2/enqueue", self.base_url))
            .json(event)
            .send()
            .await
            .map_err(|e| NotifierError::from_reqwest(NAME, &e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(NotifierError::from_response(
                NAME,
                status.as_u16(),
                &headers,
                text,
            ));
        }

        let parsed: EnqueueResponse = response
            .json()
            .await
            .map_err(|e| NotifierError::from_reqwest(NAME, &e))?;
        if !parsed.status.is_empty() && parsed.status != "success" {
            return Err(NotifierError::new(
                NAME,
                NotifierErrorKind::Client,
                format!("{}: {}", parsed.status, parsed.message),
            ));
        }
        tracing::debug!(
            action = ?event.event_action,
            dedup_key = event.dedup_key,
            "PagerDuty event accepted"
        );
        Ok(parsed)
    }

    async fn trigger(&self, dedup_key: &str, alert: &Alert) -> NotifierResult<String> {
        let event = Event {
            routing_key: &self.routing_key,
            event_action: EventAction::Trigger,
            dedup_key,
            payload: Some(payload(alert)),
        };
        let response = self.send(&event).await?;
        Ok(response
            .dedup_key
            .unwrap_or_else(|| dedup_key.to_string()))
    }

    async fn lifecycle(&self, alert: &Alert, action: EventAction) -> NotifierResult<()> {
        let event = Event {
            routing_key: &self.routing_key,
            event_action: action,
            dedup_key: dedup_key(alert),
            payload: None,
        };
        self.send(&event).await.map(|_| ())
    }
}

#[async_trait]
impl Notifier for PagerDutyNotifier {
    fn name(&self) -> &str {
        NAME
    }

    async fn notify(&self, alert: &Alert) -> NotifierResult<String> {
        self.trigger(dedup_key(alert), alert).await
    }

    /// Events v2 has no message edit; a re-trigger on the same key updates
    /// the incident's details, and resolved alerts close it.
    async fn update_message(&self, reference: &str, alert: &Alert) -> NotifierResult<()> {
        match alert.state {
            AlertState::Resolved => {
                let event = Event {
                    routing_key: &self.routing_key,
                    event_action: EventAction::Resolve,
                    dedup_key: reference,
                    payload: None,
                };
                self.send(&event).await.map(|_| ())
            }
            _ => self.trigger(reference, alert).await.map(|_| ()),
        }
    }

    fn acknowledger(&self) -> Option<&dyn Acknowledger> {
        Some(self)
    }
}

#[async_trait]
impl Acknowledger for PagerDutyNotifier {
    async fn acknowledge(&self, alert: &Alert, _event: &AckEvent) -> NotifierResult<()> {
        self.lifecycle(alert, EventAction::Acknowledge).await
    }

    async fn resolve(&self, alert: &Alert) -> NotifierResult<()> {
        self.lifecycle(alert, EventAction::Resolve).await
    }
}

fn dedup_key(alert: &Alert) -> &str {
    alert
        .external_reference(NAME)
        .unwrap_or_else(|| alert.id.as_str())
}

fn payload(alert: &Alert) -> Payload<'_> {
    let mut summary = headline(alert);
    if summary.len() > MAX_SUMMARY_LEN {
        let mut cut = MAX_SUMMARY_LEN;
        while !summary.is_char_boundary(cut) {
            cut -= 1;
        }
        summary.truncate(cut);
    }
    let source = if alert.instance.is_empty() {
        "alertsync"
    } else {
        alert.instance.as_str()
    };
    Payload {
        summary,
        source,
        severity: alert.severity.as_str(),
        timestamp: alert.fired_at.to_rfc3339(),
        component: Some(alert.target.as_str()).filter(|t| !t.is_empty()),
        custom_details: &alert.labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Actor, AlertReport, Severity, Source};
    use crate::notifier::ResilientNotifier;
    use crate::resilience::{CircuitBreakerSettings, RetryPolicy};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, PagerDutyNotifier) {
        let server = MockServer::start().await;
        let notifier = PagerDutyNotifier::new(&PagerDutyConfig {
            routing_key: "R0UT1NG".to_string(),
            api_base_url: server.uri(),
            timeout_secs: 5,
        })
        .unwrap();
        (server, notifier)
    }

    fn alert() -> Alert {
        let mut labels = HashMap::new();
        labels.insert("team".to_string(), "storage".to_string());
        let report = AlertReport {
            fingerprint: "fp-1".into(),
            name: "DiskFull".into(),
            instance: "db-1".into(),
            severity: Severity::Warning,
            labels,
            ..Default::default()
        };
        Alert::from_report(&report, Utc::now())
    }

    fn accepted(dedup_key: &str) -> ResponseTemplate {
        ResponseTemplate::new(202).set_body_json(json!({
            "status": "success",
            "message": "Event processed",
            "dedup_key": dedup_key
        }))
    }

    #[tokio::test]
    async fn test_trigger_uses_alert_id_as_dedup_key() {
        let (server, notifier) = setup().await;
        let a = alert();
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .and(body_partial_json(json!({
                "routing_key": "R0UT1NG",
                "event_action": "trigger",
                "dedup_key": a.id.as_str(),
                "payload": {
                    "summary": "[WARNING] DiskFull on db-1",
                    "source": "db-1",
                    "severity": "warning",
                    "custom_details": { "team": "storage" }
                }
            })))
            .respond_with(accepted(a.id.as_str()))
            .expect(1)
            .mount(&server)
            .await;

        let reference = notifier.notify(&a).await.unwrap();
        assert_eq!(reference, a.id.as_str());
    }

    #[tokio::test]
    async fn test_acknowledge_targets_stored_key() {
        let (server, notifier) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .and(body_partial_json(json!({
                "event_action": "acknowledge",
                "dedup_key": "incident-42"
            })))
            .respond_with(accepted("incident-42"))
            .expect(1)
            .mount(&server)
            .await;

        let mut a = alert();
        a.set_external_reference("pagerduty", "incident-42");
        let event = AckEvent::new(
            a.id.clone(),
            Source::Slack,
            &Actor::new("U1", "", "alice"),
            None,
            None,
            Utc::now(),
        );
        notifier.acknowledge(&a, &event).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_of_resolved_alert_sends_resolve() {
        let (server, notifier) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .and(body_partial_json(json!({
                "event_action": "resolve",
                "dedup_key": "incident-7"
            })))
            .respond_with(accepted("incident-7"))
            .expect(1)
            .mount(&server)
            .await;

        let mut a = alert();
        a.resolve(Utc::now());
        notifier.update_message("incident-7", &a).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_request_is_client_error() {
        let (server, notifier) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "status": "invalid event",
                "message": "Event object is invalid"
            })))
            .mount(&server)
            .await;

        let err = notifier.notify(&alert()).await.unwrap_err();
        assert_eq!(err.kind, NotifierErrorKind::Client);
        assert_eq!(err.status, Some(400));
    }

    fn resilient(notifier: PagerDutyNotifier) -> ResilientNotifier {
        ResilientNotifier::new(
            Arc::new(notifier),
            CircuitBreakerSettings::probing(10, Duration::from_secs(30), 2),
            RetryPolicy::new(Duration::from_millis(5), 2.0, Duration::from_millis(20), 3),
        )
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_success() {
        let (server, notifier) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .respond_with(accepted("k"))
            .expect(1)
            .mount(&server)
            .await;

        let a = alert();
        resilient(notifier)
            .resolve(&a, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let (server, notifier) = setup().await;
        Mock::given(method("POST"))
            .and(path("/v2/enqueue"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = resilient(notifier)
            .notify(&alert(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, NotifierErrorKind::Unauthorized);
        assert_eq!(err.destination, "pagerduty");
    }

    #[test]
    fn test_summary_is_truncated_on_char_boundary() {
        let mut a = alert();
        a.summary = "é".repeat(MAX_SUMMARY_LEN);
        let p = payload(&a);
        assert!(p.summary.len() <= MAX_SUMMARY_LEN);
        assert!(p.summary.starts_with("[WARNING] DiskFull"));
    }
}
