//! Slack Web API adapter
//!
//! Alerts are posted with `chat.postMessage`; the returned message `ts` is
//! the reference. Reminders go into that message's thread and state changes
//! rewrite it with `chat.update`.
//! Slack reports most failures as HTTP 200 with `ok: false`, so the error
//! code in the body is classified as well as the status.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{headline, Acknowledger, Notifier, NotifierError, NotifierErrorKind, NotifierResult};
use crate::config::SlackConfig;
use crate::domain::{AckEvent, Alert, AlertState, Severity};
use crate::error::{Error, Result};

const NAME: &str = "slack";

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackNotifier {
    client: reqwest::Client,
    base_url: String,
    token: String,
    channel: String,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build Slack HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.bot_token.clone(),
            channel: config.channel.clone(),
        })
    }

    async fn call(&self, method: &str, body: &Value) -> NotifierResult<SlackResponse> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(&self.token)
            .json(body)
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

        let parsed: SlackResponse = response
            .json()
            .await
            .map_err(|e| NotifierError::from_reqwest(NAME, &e))?;
        if !parsed.ok {
            let code = parsed.error.unwrap_or_else(|| "unknown_error".to_string());
            tracing::debug!(method, code = %code, "Slack API call rejected");
            return Err(NotifierError::new(NAME, classify_error_code(&code), code));
        }
        Ok(parsed)
    }

    async fn rewrite(&self, reference: &str, alert: &Alert, status: Option<String>) -> NotifierResult<()> {
        let mut body = message(alert, status);
        body["channel"] = json!(self.channel);
        body["ts"] = json!(reference);
        self.call("chat.update", &body).await.map(|_| ())
    }

    fn reference<'a>(&self, alert: &'a Alert) -> NotifierResult<&'a str> {
        alert.external_reference(NAME).ok_or_else(|| {
            NotifierError::new(
                NAME,
                NotifierErrorKind::Client,
                format!("alert {} has no Slack message", alert.id),
            )
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        NAME
    }

    async fn notify(&self, alert: &Alert) -> NotifierResult<String> {
        let mut body = message(alert, None);
        body["channel"] = json!(self.channel);
        let response = self.call("chat.postMessage", &body).await?;
        response.ts.ok_or_else(|| {
            NotifierError::new(
                NAME,
                NotifierErrorKind::Serialization,
                "chat.postMessage response has no ts",
            )
        })
    }

    /// Reply in the original thread, broadcast to the channel
    ///
    /// The first message stays the alert's handle, so its buttons keep
    /// resolving to the alert and later rewrites land on it.
    async fn remind(&self, reference: &str, alert: &Alert) -> NotifierResult<String> {
        let mut body = message(alert, Some("Still firing".to_string()));
        body["channel"] = json!(self.channel);
        body["thread_ts"] = json!(reference);
        body["reply_broadcast"] = json!(true);
        self.call("chat.postMessage", &body).await?;
        Ok(reference.to_string())
    }

    async fn update_message(&self, reference: &str, alert: &Alert) -> NotifierResult<()> {
        let status = match alert.state {
            AlertState::Active => None,
            AlertState::Acked => Some(format!(
                "Acknowledged by {}",
                alert.acked_by.as_deref().unwrap_or("unknown")
            )),
            AlertState::Resolved => Some("Resolved".to_string()),
        };
        self.rewrite(reference, alert, status).await
    }

    fn acknowledger(&self) -> Option<&dyn Acknowledger> {
        Some(self)
    }
}

#[async_trait]
impl Acknowledger for SlackNotifier {
    async fn acknowledge(&self, alert: &Alert, event: &AckEvent) -> NotifierResult<()> {
        let reference = self.reference(alert)?;
        let actor = event.actor();
        let mut status = format!(
            "Acknowledged by {} via {}",
            actor.display_name().unwrap_or("unknown"),
            event.source
        );
        if let Some(note) = &event.note {
            status.push_str(&format!(": {}", note));
        }
        self.rewrite(reference, alert, Some(status)).await
    }

    async fn resolve(&self, alert: &Alert) -> NotifierResult<()> {
        let reference = self.reference(alert)?;
        self.rewrite(reference, alert, Some("Resolved".to_string()))
            .await
    }
}

fn message(alert: &Alert, status: Option<String>) -> Value {
    let color = match (alert.state, alert.severity) {
        (AlertState::Resolved, _) => "#2eb67d",
        (AlertState::Acked, _) => "#ecb22e",
        (_, Severity::Critical) => "#e01e5a",
        (_, Severity::Warning) => "#ff9500",
        (_, Severity::Info) => "#36c5f0",
    };
    let mut fields = vec![json!({ "title": "Severity", "value": alert.severity.as_str(), "short": true })];
    if !alert.target.is_empty() {
        fields.push(json!({ "title": "Target", "value": alert.target, "short": true }));
    }
    if let Some(status) = &status {
        fields.push(json!({ "title": "Status", "value": status, "short": false }));
    }

    json!({
        "text": headline(alert),
        "attachments": [{
            "color": color,
            "text": alert.description,
            "fields": fields,
            "ts": alert.fired_at.timestamp(),
        }],
    })
}

fn classify_error_code(code: &str) -> NotifierErrorKind {
    match code {
        "ratelimited" | "rate_limited" => NotifierErrorKind::RateLimited,
        "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked"
        | "token_expired" | "missing_scope" | "no_permission" => NotifierErrorKind::Unauthorized,
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            NotifierErrorKind::Server
        }
        _ => NotifierErrorKind::Client,
    }
}
