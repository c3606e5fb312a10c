//! Notification destinations
//!
//! Every destination implements [`Notifier`]. Destinations that can also
//! mirror acknowledgment state expose an [`Acknowledger`] through
//! [`Notifier::acknowledger`]; the others are left out of ack fan-out but
//! still receive new alerts.
//!
//! Adapters are raw: no retries, no breaker. [`ResilientNotifier`] wraps
//! one adapter with its shared breaker and retry policy, and
//! [`Destinations`] holds the ordered set the services fan out over.

use async_trait::async_trait;

use crate::domain::{AckEvent, Alert};

mod error;
mod pagerduty;
mod registry;
mod resilient;
mod slack;

pub use error::{NotifierError, NotifierErrorKind};
pub use pagerduty::PagerDutyNotifier;
pub use registry::{Delivery, Destinations, FanOutReport};
pub use resilient::ResilientNotifier;
pub use slack::SlackNotifier;

/// Result type for adapter calls
pub type NotifierResult<T> = std::result::Result<T, NotifierError>;

/// Capabilities every destination supports
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Destination key, also used in `Alert::external_references`
    fn name(&self) -> &str;

    /// Announce an alert; returns the destination's reference for it
    async fn notify(&self, alert: &Alert) -> NotifierResult<String>;

    /// Announce an alert again after the resend interval
    ///
    /// `reference` is the one stored from the first notification. Returns
    /// the reference to keep; the default simply notifies again.
    async fn remind(&self, _reference: &str, alert: &Alert) -> NotifierResult<String> {
        self.notify(alert).await
    }

    /// Rewrite a previously sent message to reflect the alert's current state
    async fn update_message(&self, reference: &str, alert: &Alert) -> NotifierResult<()>;

    /// Ack capability, if the destination has one
    fn acknowledger(&self) -> Option<&dyn Acknowledger> {
        None
    }
}

/// Destinations that mirror acknowledgment and resolution
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn acknowledge(&self, alert: &Alert, event: &AckEvent) -> NotifierResult<()>;

    async fn resolve(&self, alert: &Alert) -> NotifierResult<()>;
}

/// One-line plain text summary shared by the adapters
pub(crate) fn headline(alert: &Alert) -> String {
    let mut line = format!(
        "[{}] {}",
        alert.severity.as_str().to_uppercase(),
        alert.name
    );
    if !alert.instance.is_empty() {
        line.push_str(" on ");
        line.push_str(&alert.instance);
    }
    if !alert.summary.is_empty() {
        line.push_str(": ");
        line.push_str(&alert.summary);
    }
    line
}
