//! Alert routing services
//!
//! - [`AlertIngestor`]: dedup, resend and resolution of inbound reports
//! - [`AckSynchronizer`]: makes one destination's ack authoritative and
//!   propagates it to the others
//! - [`SilenceService`]: silence lifecycle and the expiry sweeper
//!
//! Each service is built from a [`ServiceContext`](crate::context::ServiceContext)
//! and is cheap to clone.

mod ack_sync;
mod ingest;
mod silence;

pub use ack_sync::{AckAction, AckOutcome, AckRequest, AckSynchronizer, AlertRef};
pub use ingest::{AlertIngestor, IngestOutcome, Ingestion};
pub use silence::{NewSilence, SilenceService};

use crate::domain::Alert;
use crate::error::{Error, Result};
use crate::ids::AlertId;
use crate::notifier::{Delivery, FanOutReport};
use crate::repository::AlertRepository;

/// Apply `mutate` and write the alert optimistically
///
/// On a version conflict the alert is reloaded and `mutate` applied once
/// more; a second conflict is returned to the caller. `mutate` returns
/// `false` when there is nothing to write, in which case the current copy
/// is returned untouched.
pub(crate) async fn update_alert<F>(
    alerts: &dyn AlertRepository,
    alert: Alert,
    mut mutate: F,
) -> Result<(Alert, bool)>
where
    F: FnMut(&mut Alert) -> Result<bool>,
{
    let mut current = alert;
    let mut reloaded = false;
    loop {
        let mut next = current.clone();
        if !mutate(&mut next)? {
            return Ok((current, false));
        }
        match alerts.update(&next).await {
            Ok(stored) => return Ok((stored, true)),
            Err(e) if e.is_concurrent_update() && !reloaded => {
                tracing::debug!(alert_id = %next.id, "Version conflict, reloading alert");
                reloaded = true;
                current = reload(alerts, &next.id).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn reload(alerts: &dyn AlertRepository, id: &AlertId) -> Result<Alert> {
    alerts
        .find_by_id(id)
        .await?
        .ok_or_else(|| Error::AlertNotFound(id.to_string()))
}

/// Fold deliveries into a report, logging every failure
pub(crate) fn summarize<T>(
    alert_id: &AlertId,
    action: &str,
    deliveries: &[Delivery<T>],
) -> FanOutReport {
    let mut report = FanOutReport::default();
    for delivery in deliveries {
        if let Err(error) = &delivery.result {
            tracing::warn!(
                alert_id = %alert_id,
                destination = %delivery.destination,
                action,
                error = %error,
                "Destination call failed"
            );
        }
        report.record(delivery);
    }
    report
}
