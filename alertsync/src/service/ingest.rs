//! Alert ingestion
//!
//! One inbound report either opens an alert, folds into the open alert for
//! the same fingerprint, or resolves it. Which of those happens depends on
//! two windows measured against the context clock:
//!
//! - the resend interval since the last fan-out, which wins first and
//!   re-notifies every destination;
//! - the deduplication window since the alert last fired, inside which a
//!   re-fire is absorbed without any fan-out.
//!
//! A re-fire outside both windows is a refresh: details are updated and
//! nobody is paged. Alerts matched by an active silence are stored but
//! never fanned out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::{summarize, update_alert};
use crate::context::ServiceContext;
use crate::domain::{Alert, AlertReport};
use crate::error::{Error, Result};
use crate::notifier::{Delivery, Destinations, FanOutReport, ResilientNotifier};

/// What ingestion did with a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestOutcome {
    /// New alert stored and fanned out
    Created,
    /// Re-fire inside the dedup window; no fan-out
    Deduplicated,
    /// Re-fire outside the dedup window but before the resend interval
    Refreshed,
    /// Resend interval elapsed; every destination notified again
    Renotified,
    /// Open alert resolved and the resolution fanned out
    Resolved,
    /// Stored, but an active silence suppressed the fan-out
    Silenced,
    /// Resolved report for a fingerprint with no open alert
    IgnoredResolution,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deduplicated => "deduplicated",
            Self::Refreshed => "refreshed",
            Self::Renotified => "renotified",
            Self::Resolved => "resolved",
            Self::Silenced => "silenced",
            Self::IgnoredResolution => "ignored_resolution",
        }
    }

    /// Whether destinations were called
    pub fn fanned_out(&self) -> bool {
        matches!(self, Self::Created | Self::Renotified | Self::Resolved)
    }
}

impl std::fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of ingesting one report
#[derive(Debug)]
pub struct Ingestion {
    pub outcome: IngestOutcome,
    /// Latest stored copy; `None` only for an ignored resolution
    pub alert: Option<Alert>,
    pub fan_out: FanOutReport,
}

impl Ingestion {
    fn quiet(outcome: IngestOutcome, alert: Alert) -> Self {
        Self {
            outcome,
            alert: Some(alert),
            fan_out: FanOutReport::default(),
        }
    }
}

/// Turns inbound reports into alert state and notifications
#[derive(Debug, Clone)]
pub struct AlertIngestor {
    ctx: ServiceContext,
}

impl AlertIngestor {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Ingest one report
    ///
    /// The alert is persisted before any destination is called. If another
    /// writer changes the open alert between the decision and the write,
    /// the whole decision is taken once more against fresh state.
    pub async fn ingest(
        &self,
        report: &AlertReport,
        cancel: &CancellationToken,
    ) -> Result<Ingestion> {
        if report.fingerprint.trim().is_empty() {
            return Err(Error::Validation(
                "alert report has an empty fingerprint".to_string(),
            ));
        }

        let mut retried = false;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.try_ingest(report, cancel).await {
                Err(Error::Repository(e)) if e.is_concurrent_update() && !retried => {
                    tracing::debug!(
                        fingerprint = %report.fingerprint,
                        "Open alert changed underneath ingestion, deciding again"
                    );
                    retried = true;
                }
                result => return result,
            }
        }
    }

    async fn try_ingest(
        &self,
        report: &AlertReport,
        cancel: &CancellationToken,
    ) -> Result<Ingestion> {
        let now = self.ctx.now();
        let open = self
            .ctx
            .alerts()
            .find_open_by_fingerprint(&report.fingerprint)
            .await?;

        let ingestion = match (open, report.resolved) {
            (None, true) => {
                tracing::debug!(
                    fingerprint = %report.fingerprint,
                    "Resolved report with no open alert"
                );
                Ingestion {
                    outcome: IngestOutcome::IgnoredResolution,
                    alert: None,
                    fan_out: FanOutReport::default(),
                }
            }
            (Some(alert), true) => self.resolve(alert, now, cancel).await?,
            (None, false) => self.create(report, now, cancel).await?,
            (Some(alert), false) => self.refire(alert, report, now, cancel).await?,
        };

        if let Some(alert) = &ingestion.alert {
            tracing::info!(
                alert_id = %alert.id,
                fingerprint = %alert.fingerprint,
                outcome = %ingestion.outcome,
                delivered = ingestion.fan_out.delivered.len(),
                failed = ingestion.fan_out.failed.len(),
                "Alert report ingested"
            );
        }

        if ingestion.outcome.fanned_out() && cancel.is_cancelled() {
            // The alert is stored; only the fan-out was cut short
            return Err(Error::Cancelled);
        }
        Ok(ingestion)
    }

    async fn create(
        &self,
        report: &AlertReport,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Ingestion> {
        let mut alert = Alert::from_report(report, now);

        if self.is_silenced(&alert, now).await? {
            self.ctx.alerts().save(&alert).await?;
            return Ok(Ingestion::quiet(IngestOutcome::Silenced, alert));
        }

        alert.last_notified_at = Some(now);
        self.ctx.alerts().save(&alert).await?;
        let (alert, fan_out) = self.notify_all(alert, cancel).await;
        Ok(Ingestion {
            outcome: IngestOutcome::Created,
            alert: Some(alert),
            fan_out,
        })
    }

    async fn refire(
        &self,
        alert: Alert,
        report: &AlertReport,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Ingestion> {
        let alerting = &self.ctx.config().alerting;
        let last_notified = alert.last_notified_at.unwrap_or(alert.created_at);
        let resend_due = elapsed(last_notified, now) >= alerting.resend_interval();
        let within_dedup = elapsed(alert.fired_at, now) < alerting.deduplication_window();

        let mut next = alert;
        next.refresh_from(report);
        next.updated_at = now;

        if resend_due {
            if self.is_silenced(&next, now).await? {
                let stored = self.ctx.alerts().update(&next).await?;
                return Ok(Ingestion::quiet(IngestOutcome::Silenced, stored));
            }
            next.last_notified_at = Some(now);
            let stored = self.ctx.alerts().update(&next).await?;
            let (alert, fan_out) = self.notify_all(stored, cancel).await;
            return Ok(Ingestion {
                outcome: IngestOutcome::Renotified,
                alert: Some(alert),
                fan_out,
            });
        }

        let outcome = if within_dedup {
            IngestOutcome::Deduplicated
        } else {
            IngestOutcome::Refreshed
        };
        let stored = self.ctx.alerts().update(&next).await?;
        Ok(Ingestion::quiet(outcome, stored))
    }

    async fn resolve(
        &self,
        alert: Alert,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Ingestion> {
        let mut next = alert;
        next.resolve(now);
        next.updated_at = now;
        let stored = self.ctx.alerts().update(&next).await?;

        let targets: Vec<Arc<ResilientNotifier>> = self
            .ctx
            .destinations()
            .iter()
            .filter(|n| n.supports_ack() || stored.external_reference(n.name()).is_some())
            .cloned()
            .collect();

        let alert = &stored;
        let deliveries = Destinations::broadcast(targets, |notifier| async move {
            if notifier.supports_ack() {
                return notifier.resolve(alert, cancel).await;
            }
            match alert.external_reference(notifier.name()) {
                Some(reference) => notifier.update_message(reference, alert, cancel).await,
                None => Ok(()),
            }
        })
        .await;
        let fan_out = summarize(&stored.id, "resolve", &deliveries);

        Ok(Ingestion {
            outcome: IngestOutcome::Resolved,
            alert: Some(stored),
            fan_out,
        })
    }

    async fn is_silenced(&self, alert: &Alert, now: DateTime<Utc>) -> Result<bool> {
        let silences = self.ctx.silences().find_matching_alert(alert, now).await?;
        if let Some(silence) = silences.first() {
            tracing::info!(
                alert_id = %alert.id,
                fingerprint = %alert.fingerprint,
                silence_id = %silence.id,
                matched = silences.len(),
                "Alert silenced, skipping fan-out"
            );
        }
        Ok(!silences.is_empty())
    }

    /// Notify every destination and keep the references they hand back
    ///
    /// A destination that already holds a reference gets a reminder tied
    /// to it instead of a fresh notification. Never fails: delivery errors
    /// land in the report and a failed reference write is logged, leaving
    /// the stored alert as it was.
    async fn notify_all(&self, alert: Alert, cancel: &CancellationToken) -> (Alert, FanOutReport) {
        let targets: Vec<Arc<ResilientNotifier>> =
            self.ctx.destinations().iter().cloned().collect();
        let deliveries = {
            let alert = &alert;
            Destinations::broadcast(targets, |notifier| async move {
                match alert.external_reference(notifier.name()) {
                    Some(reference) => notifier.remind(reference, alert, cancel).await,
                    None => notifier.notify(alert, cancel).await,
                }
            })
            .await
        };
        let fan_out = summarize(&alert.id, "notify", &deliveries);
        let alert = self.record_references(alert, &deliveries).await;
        (alert, fan_out)
    }

    /// Store references for destinations that had none
    ///
    /// The first reference a destination issued is never replaced; inbound
    /// webhooks from the original message must keep resolving.
    async fn record_references(&self, alert: Alert, deliveries: &[Delivery<String>]) -> Alert {
        let references: Vec<(&str, &str)> = deliveries
            .iter()
            .filter_map(|d| match &d.result {
                Ok(reference) => Some((d.destination.as_str(), reference.as_str())),
                Err(_) => None,
            })
            .collect();
        let alert_id = alert.id.clone();
        let fallback = alert.clone();
        let now = self.ctx.now();

        let result = update_alert(self.ctx.alerts(), alert, |a| {
            let mut changed = false;
            for (destination, reference) in &references {
                if a.external_reference(destination).is_none() {
                    a.set_external_reference(*destination, *reference);
                    changed = true;
                }
            }
            if changed {
                a.updated_at = now;
            }
            Ok(changed)
        })
        .await;

        match result {
            Ok((stored, _)) => stored,
            Err(e) => {
                tracing::warn!(
                    alert_id = %alert_id,
                    error = %e,
                    "Failed to store destination references"
                );
                fallback
            }
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    // Timestamps from the future count as no time at all
    (now - since).to_std().unwrap_or_default()
}
